//! # Companies
//!
//! Fixed set of tracked issuers plus two static tables:
//!
//! - the keyword table used by [`tag`] to attach at most one company to an
//!   article (case-insensitive substring match, first company in table order wins);
//! - the company directory (`companies.json`) with display metadata.
//!
//! Keywords carry both Cyrillic and Latin spellings, including the common
//! genitive forms that headlines use.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::store::{read_collection, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompanyId {
    Gazp,
    Sber,
    Yndx,
    Lkoh,
    Rosn,
    Nvtk,
    Poly,
    Norn,
    Tatn,
    Volp,
}

impl CompanyId {
    pub const ALL: [CompanyId; 10] = [
        CompanyId::Gazp,
        CompanyId::Sber,
        CompanyId::Yndx,
        CompanyId::Lkoh,
        CompanyId::Rosn,
        CompanyId::Nvtk,
        CompanyId::Poly,
        CompanyId::Norn,
        CompanyId::Tatn,
        CompanyId::Volp,
    ];

    pub fn ticker(self) -> &'static str {
        match self {
            CompanyId::Gazp => "GAZP",
            CompanyId::Sber => "SBER",
            CompanyId::Yndx => "YNDX",
            CompanyId::Lkoh => "LKOH",
            CompanyId::Rosn => "ROSN",
            CompanyId::Nvtk => "NVTK",
            CompanyId::Poly => "POLY",
            CompanyId::Norn => "NORN",
            CompanyId::Tatn => "TATN",
            CompanyId::Volp => "VOLP",
        }
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

impl FromStr for CompanyId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim();
        CompanyId::ALL
            .into_iter()
            .find(|c| c.ticker().eq_ignore_ascii_case(t))
            .ok_or_else(|| anyhow!("unknown company ticker: {s}"))
    }
}

/// Keyword table in match order.
pub const COMPANY_KEYWORDS: &[(CompanyId, &[&str])] = &[
    (CompanyId::Gazp, &["газпром", "gazprom", "газпрома", "gazproma"]),
    (CompanyId::Sber, &["сбер", "сбербанк", "sber", "sberbank"]),
    (CompanyId::Yndx, &["яндекс", "yandex", "яндекса", "yandexa"]),
    (CompanyId::Lkoh, &["лукойл", "lukoil", "лукойла", "lukoila"]),
    (CompanyId::Rosn, &["роснефть", "rosneft", "роснефти", "rosnefti"]),
    (CompanyId::Nvtk, &["новатэк", "novatek", "новатэка", "novateka"]),
    (CompanyId::Poly, &["полюс", "polyus", "полюса", "polyusa"]),
    (CompanyId::Norn, &["норникель", "nornickel", "норникеля", "nornickela", "гмк"]),
    (CompanyId::Tatn, &["татнефть", "tatneft", "татнефти", "tatnefti"]),
    (CompanyId::Volp, &["волтайр", "voltyre", "волтайр-пром", "titan tire"]),
];

/// First company whose keyword occurs in `text`.
pub fn tag(text: &str) -> Option<CompanyId> {
    let lower = text.to_lowercase();
    COMPANY_KEYWORDS
        .iter()
        .find(|(_, kws)| kws.iter().any(|kw| lower.contains(kw)))
        .map(|(id, _)| *id)
}

/// Display metadata for one tracked company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyInfo {
    pub symbol: CompanyId,
    pub name: String,
    pub sector: String,
}

#[derive(Debug, Clone)]
pub struct CompanyDirectory {
    companies: Vec<CompanyInfo>,
}

impl CompanyDirectory {
    /// Load `companies.json`, writing the built-in seed if the file is missing.
    pub fn load_or_seed(path: &Path) -> Result<Self> {
        if !path.exists() {
            let seed = Self::default_seed();
            write_atomic(path, &seed.companies)?;
            tracing::info!(path = %path.display(), "seeded company directory");
            return Ok(seed);
        }
        let companies: Vec<CompanyInfo> = read_collection(path)?;
        Ok(Self { companies })
    }

    pub fn get(&self, id: CompanyId) -> Option<&CompanyInfo> {
        self.companies.iter().find(|c| c.symbol == id)
    }

    pub fn all(&self) -> &[CompanyInfo] {
        &self.companies
    }

    /// Case-insensitive match on name, ticker or sector.
    pub fn search(&self, query: &str) -> Vec<&CompanyInfo> {
        let q = query.to_lowercase();
        self.companies
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&q)
                    || c.symbol.ticker().to_lowercase().contains(&q)
                    || c.sector.to_lowercase().contains(&q)
            })
            .collect()
    }

    pub(crate) fn default_seed() -> Self {
        let seed = [
            (CompanyId::Gazp, "Gazprom", "Oil & Gas"),
            (CompanyId::Sber, "Sberbank", "Banking"),
            (CompanyId::Yndx, "Yandex", "Technology"),
            (CompanyId::Lkoh, "Lukoil", "Oil & Gas"),
            (CompanyId::Rosn, "Rosneft", "Oil & Gas"),
            (CompanyId::Nvtk, "Novatek", "Oil & Gas"),
            (CompanyId::Poly, "Polyus", "Metals & Mining"),
            (CompanyId::Norn, "Nornickel", "Metals & Mining"),
            (CompanyId::Tatn, "Tatneft", "Oil & Gas"),
            (CompanyId::Volp, "Voltyre-Prom", "Industrials"),
        ];
        Self {
            companies: seed
                .into_iter()
                .map(|(symbol, name, sector)| CompanyInfo {
                    symbol,
                    name: name.to_string(),
                    sector: sector.to_string(),
                })
                .collect(),
        }
    }
}
