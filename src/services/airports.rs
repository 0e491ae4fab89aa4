//! In-memory airport dataset loaded from CSV.
//!
//! Columns: `icao,iata,name,lat,lon,elevation_ft,municipality,region,scheduled_service,type`.
//! Rows without an ICAO code or with unparseable coordinates are skipped.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AirportRecord {
    pub icao: String,
    pub iata: Option<String>,
    pub name: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    pub elevation_ft: Option<i64>,
    pub municipality: Option<String>,
    pub region: Option<String>,
    pub scheduled_service: Option<String>,
    #[serde(rename = "type")]
    pub airport_type: Option<String>,
}

/// Search hit with its match score (higher is better).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AirportMatch {
    #[serde(flatten)]
    pub airport: AirportRecord,
    pub score: u32,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    icao: Option<String>,
    iata: Option<String>,
    name: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    elevation_ft: Option<String>,
    municipality: Option<String>,
    region: Option<String>,
    scheduled_service: Option<String>,
    #[serde(rename = "type")]
    airport_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct AirportRepo {
    airports: Vec<AirportRecord>,
    by_icao: HashMap<String, usize>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AirportRepo {
    /// Load from `path`. A missing file yields an empty repository so the
    /// service still answers coordinate and GPX requests.
    pub fn load(path: &Path) -> Result<Self, csv::Error> {
        if !path.exists() {
            tracing::warn!(
                "Airport dataset not found at {}, ICAO lookups will fail",
                path.display()
            );
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)?;
        let repo = Self::from_reader(file)?;
        tracing::info!("Loaded {} airports from {}", repo.len(), path.display());
        Ok(repo)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut repo = Self::default();
        for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("Skipping malformed airport row {}: {}", line + 2, e);
                    continue;
                }
            };
            if let Some(record) = Self::record_from_row(row) {
                repo.insert(record);
            }
        }
        Ok(repo)
    }

    fn record_from_row(row: CsvRow) -> Option<AirportRecord> {
        let icao = non_empty(row.icao)?.to_uppercase();
        let latitude = row.lat.as_deref().and_then(|v| v.trim().parse::<f64>().ok());
        let longitude = row.lon.as_deref().and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            tracing::warn!("Skipping airport {} without usable coordinates", icao);
            return None;
        };

        let elevation_ft = row
            .elevation_ft
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse::<i64>().ok());

        Some(AirportRecord {
            icao,
            iata: non_empty(row.iata).map(|v| v.to_uppercase()),
            name: non_empty(row.name).unwrap_or_default(),
            latitude,
            longitude,
            elevation_ft,
            municipality: non_empty(row.municipality),
            region: non_empty(row.region),
            scheduled_service: non_empty(row.scheduled_service),
            airport_type: non_empty(row.airport_type),
        })
    }

    fn insert(&mut self, record: AirportRecord) {
        match self.by_icao.get(&record.icao) {
            // Later rows replace earlier ones with the same code
            Some(&idx) => self.airports[idx] = record,
            None => {
                self.by_icao.insert(record.icao.clone(), self.airports.len());
                self.airports.push(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.airports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.airports.is_empty()
    }

    pub fn get_by_icao(&self, icao: &str) -> Option<&AirportRecord> {
        let key = icao.trim().to_uppercase();
        self.by_icao.get(&key).map(|&idx| &self.airports[idx])
    }

    /// Ranked search over codes, names, municipality and region.
    /// Ties keep dataset order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<AirportMatch> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<AirportMatch> = self
            .airports
            .iter()
            .filter_map(|airport| {
                let score = match_score(&q, airport);
                (score > 0).then(|| AirportMatch {
                    airport: airport.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit.max(1));
        hits
    }
}

fn match_score(q: &str, airport: &AirportRecord) -> u32 {
    let icao = airport.icao.to_lowercase();
    let iata = airport.iata.as_deref().unwrap_or("").to_lowercase();
    let name = airport.name.to_lowercase();
    let municipality = airport.municipality.as_deref().unwrap_or("").to_lowercase();
    let region = airport.region.as_deref().unwrap_or("").to_lowercase();

    if q == icao || (!iata.is_empty() && q == iata) {
        return 100;
    }

    let rules = [
        (icao.starts_with(q), 90),
        (!iata.is_empty() && iata.starts_with(q), 88),
        (icao.contains(q), 80),
        (!iata.is_empty() && iata.contains(q), 78),
        (name.starts_with(q), 70),
        (name.contains(q), 60),
        (municipality.starts_with(q), 55),
        (municipality.contains(q), 45),
        (region.contains(q), 30),
    ];
    rules
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, score)| *score)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
icao,iata,name,lat,lon,elevation_ft,municipality,region,scheduled_service,type
KDEN,DEN,Denver International Airport,39.8617,-104.6731,5434,Denver,US-CO,yes,large_airport
KAPA,APA,Centennial Airport,39.5701,-104.849,5885,Denver,US-CO,no,medium_airport
kbjc,bjc,Rocky Mountain Metropolitan Airport,39.9088,-105.117,,Denver,US-CO,no,medium_airport
,XXX,Nameless Field,10.0,10.0,,,,,
KBAD,,Broken Coordinates,north,-104.0,100,,,,
KATL,ATL,Hartsfield-Jackson Atlanta International Airport,33.6367,-84.4281,1026,Atlanta,US-GA,yes,large_airport
";

    fn repo() -> AirportRepo {
        AirportRepo::from_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn test_load_skips_rows_without_code_or_coordinates() {
        let repo = repo();
        assert_eq!(repo.len(), 4);
        assert!(repo.get_by_icao("KBAD").is_none());
    }

    #[test]
    fn test_codes_are_upper_cased_and_lookup_is_case_insensitive() {
        let repo = repo();
        let bjc = repo.get_by_icao(" kbjc ").unwrap();
        assert_eq!(bjc.icao, "KBJC");
        assert_eq!(bjc.iata.as_deref(), Some("BJC"));
        assert_eq!(bjc.elevation_ft, None);

        let den = repo.get_by_icao("kden").unwrap();
        assert_eq!(den.elevation_ft, Some(5434));
        assert!((den.latitude - 39.8617).abs() < 1e-9);
        assert_eq!(den.airport_type.as_deref(), Some("large_airport"));
    }

    #[test]
    fn test_exact_code_match_ranks_first() {
        let hits = repo().search("den", 10);
        assert_eq!(hits[0].airport.icao, "KDEN");
        assert_eq!(hits[0].score, 100);
        // Other Denver-area airports match on municipality
        assert!(hits.iter().skip(1).all(|h| h.score == 55));
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_prefix_and_name_scores() {
        let repo = repo();
        assert_eq!(repo.search("KA", 10)[0].score, 90);
        assert_eq!(repo.search("hartsfield", 10)[0].score, 70);
        assert_eq!(repo.search("atlanta intl", 10).len(), 0);
        assert_eq!(repo.search("international", 10)[0].score, 60);
        assert_eq!(repo.search("us-ga", 10)[0].score, 30);
    }

    #[test]
    fn test_search_respects_limit_and_blank_query() {
        let repo = repo();
        assert_eq!(repo.search("airport", 2).len(), 2);
        assert!(repo.search("   ", 10).is_empty());
        assert!(repo.search("zzzz", 10).is_empty());
    }

    #[test]
    fn test_missing_file_gives_empty_repo() {
        let repo = AirportRepo::load(Path::new("/nonexistent/airports.csv")).unwrap();
        assert!(repo.is_empty());
    }
}
