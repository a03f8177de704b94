//! League whitelist — plain comma-separated rows of
//! `upstream sport id, upstream league id, display name, internal id, base scale`.
//!
//! Fields themselves must not contain commas (no quoting is supported); a name
//! with a comma shifts the field count and the row is skipped with a warning.

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct League {
    pub sport_id: String,
    pub league_id: String,
    pub name: String,
    pub internal_id: String,
    /// Seed popularity for matches in this league before the identity-derived
    /// scale takes over.
    pub base_scale: f64,
}

pub fn load(path: &str) -> Result<Vec<League>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(parse_rows(&raw))
}

/// Malformed rows are logged and skipped; the run continues with the rest.
pub fn parse_rows(raw: &str) -> Vec<League> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 5 {
                warn!("Skipping whitelist row with {} fields: {line}", fields.len());
                return None;
            }
            let base_scale = match fields[4].parse::<f64>() {
                Ok(s) => s,
                Err(_) => {
                    warn!("Skipping whitelist row with bad scale: {line}");
                    return None;
                }
            };
            Some(League {
                sport_id: fields[0].to_string(),
                league_id: fields[1].to_string(),
                name: fields[2].to_string(),
                internal_id: fields[3].to_string(),
                base_scale,
            })
        })
        .collect()
}
