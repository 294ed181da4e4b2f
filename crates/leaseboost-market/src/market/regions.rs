use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use super::normalizer::normalize_city;

/// Coarse market bucket used for regional matching and baseline prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    ParisCenter,
    ParisBanlieue,
    IdfExtended,
    Other,
}

impl Region {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::ParisCenter,
            Self::ParisBanlieue,
            Self::IdfExtended,
            Self::Other,
        ]
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::ParisCenter => "paris_center",
            Self::ParisBanlieue => "paris_banlieue",
            Self::IdfExtended => "idf_extended",
            Self::Other => "other",
        }
    }

    /// Annual rent per square metre used when no observed data exists.
    pub const fn baseline_price(self) -> f64 {
        match self {
            Self::ParisCenter => 450.0,
            Self::ParisBanlieue => 480.0,
            Self::IdfExtended => 220.0,
            Self::Other => 180.0,
        }
    }

    const fn member_cities(self) -> &'static [&'static str] {
        match self {
            Self::ParisCenter => &["Paris", "Boulogne-Billancourt", "Neuilly-sur-Seine"],
            Self::ParisBanlieue => &["Nanterre", "Creteil", "Saint-Denis", "Montreuil", "Drancy"],
            Self::IdfExtended => &["Versailles", "Meaux", "Evry", "Pontoise"],
            Self::Other => &[],
        }
    }

    fn from_department(department: &str) -> Self {
        match department {
            "92" | "93" | "94" => Self::ParisBanlieue,
            "77" | "78" | "91" | "95" => Self::IdfExtended,
            _ => Self::Other,
        }
    }
}

const BUILT_IN_POSTAL_CODES: &[(&str, &str)] = &[
    ("nanterre", "92000"),
    ("boulogne-billancourt", "92100"),
    ("neuilly-sur-seine", "92200"),
    ("levallois-perret", "92300"),
    ("courbevoie", "92400"),
    ("issy-les-moulineaux", "92130"),
    ("rueil-malmaison", "92500"),
    ("colombes", "92700"),
    ("saint-denis", "93200"),
    ("montreuil", "93100"),
    ("drancy", "93700"),
    ("aubervilliers", "93300"),
    ("bobigny", "93000"),
    ("creteil", "94000"),
    ("vincennes", "94300"),
    ("vitry-sur-seine", "94400"),
    ("ivry-sur-seine", "94200"),
    ("meaux", "77100"),
    ("melun", "77000"),
    ("versailles", "78000"),
    ("saint-germain-en-laye", "78100"),
    ("evry", "91000"),
    ("massy", "91300"),
    ("pontoise", "95000"),
    ("cergy", "95000"),
    ("argenteuil", "95100"),
    ("lyon", "69001"),
    ("marseille", "13001"),
    ("toulouse", "31000"),
    ("bordeaux", "33000"),
    ("lille", "59000"),
    ("nantes", "44000"),
    ("nice", "06000"),
    ("strasbourg", "67000"),
];

#[derive(Debug, thiserror::Error)]
pub enum RegionCatalogError {
    #[error("failed to read postal code table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid postal code table: {0}")]
    Csv(#[from] csv::Error),
}

/// Static lookup tables for region bucketing. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct RegionCatalog {
    postal_codes: HashMap<String, String>,
    members: HashMap<Region, HashSet<String>>,
}

impl Default for RegionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl RegionCatalog {
    pub fn standard() -> Self {
        let postal_codes = BUILT_IN_POSTAL_CODES
            .iter()
            .map(|(city, code)| (fold_key(city), (*code).to_string()))
            .collect();
        let members = Region::ordered()
            .into_iter()
            .map(|region| {
                let keys = region
                    .member_cities()
                    .iter()
                    .map(|city| fold_key(city))
                    .collect();
                (region, keys)
            })
            .collect();

        Self {
            postal_codes,
            members,
        }
    }

    pub fn from_postal_code_file<P: AsRef<Path>>(path: P) -> Result<Self, RegionCatalogError> {
        let file = std::fs::File::open(path)?;
        Self::standard().with_postal_codes(file)
    }

    /// Extends the table from a `;`-delimited export with `Commune` and
    /// `Code Postal` columns.
    pub fn with_postal_codes<R: Read>(mut self, reader: R) -> Result<Self, RegionCatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);

        for row in csv_reader.deserialize::<PostalCodeRow>() {
            let row = row?;
            if row.postal_code.len() >= 2 {
                self.postal_codes
                    .insert(fold_key(&row.commune), row.postal_code);
            }
        }

        Ok(self)
    }

    pub fn postal_code_count(&self) -> usize {
        self.postal_codes.len()
    }

    /// Never fails: unknown cities fall into [`Region::Other`].
    pub fn region_for(&self, city: &str) -> Region {
        let key = fold_key(city);
        if key.starts_with("paris") {
            return Region::ParisCenter;
        }

        let inline_code = city
            .split_whitespace()
            .skip(1)
            .find(|token| token.len() == 5 && token.bytes().all(|b| b.is_ascii_digit()));
        let bare_key = fold_key(&normalize_city(city));
        let postal_code =
            inline_code.or_else(|| self.postal_codes.get(&bare_key).map(String::as_str));

        match postal_code {
            Some(code) => Region::from_department(code.get(..2).unwrap_or_default()),
            None => Region::Other,
        }
    }

    pub fn baseline_price_for(&self, city: &str) -> f64 {
        self.region_for(city).baseline_price()
    }

    /// Whether a dataset city key belongs to the region's reference cities.
    pub fn is_member(&self, region: Region, city_key: &str) -> bool {
        self.members
            .get(&region)
            .is_some_and(|keys| keys.contains(&fold_key(city_key)))
    }
}

#[derive(Debug, Deserialize)]
struct PostalCodeRow {
    #[serde(rename = "Commune")]
    commune: String,
    #[serde(rename = "Code Postal")]
    postal_code: String,
}

/// Lowercase, accent-free key so `"Créteil"` and `"CRETEIL"` meet.
fn fold_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
