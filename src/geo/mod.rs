//! Reverse geo-enrichment from GPS coordinates to a hierarchical path.
//!
//! Pure lookup over an offline dataset: coordinate → nearest place cell →
//! (country_code, admin1, city), then ISO table → country name and
//! continent. No network access.

pub mod countries;
pub mod places;

use anyhow::Result;

use crate::config::Config;
use countries::country_info;
use places::PlaceIndex;

/// Result of a successful reverse lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    /// `Geo|<continent>|<country>[|<region>][|<city>]`, empty levels dropped.
    pub hierarchy: String,
    /// Human-readable "city, region, country" hint for LLM prompts.
    pub location_hint: String,
    /// Last non-empty level, candidate for tag append.
    pub leaf: String,
}

pub struct GeoEnricher {
    index: PlaceIndex,
}

impl GeoEnricher {
    /// Load the configured places dataset, falling back to the embedded one.
    pub fn new(config: &Config) -> Result<Self> {
        let index = match &config.paths.places {
            Some(path) => PlaceIndex::from_csv_path(path)?,
            None => PlaceIndex::embedded()?,
        };
        tracing::debug!(places = index.len(), "Geo enricher ready");
        Ok(Self { index })
    }

    /// Map coordinates to the geographic hierarchy, or None when the point
    /// falls outside every land cell or the country code is unknown.
    pub fn lookup(&self, lat: f64, lon: f64) -> Option<GeoLocation> {
        let place = self.index.nearest(lat, lon)?;
        let (country, continent) = country_info(&place.country_code)?;

        let levels = assemble_levels(continent, country, &place.admin1, &place.city);
        if levels.is_empty() {
            return None;
        }

        let hierarchy = format!("Geo|{}", levels.join("|"));
        let location_hint = levels
            .iter()
            .rev()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let leaf = levels.last().cloned().unwrap_or_default();

        Some(GeoLocation {
            hierarchy,
            location_hint,
            leaf,
        })
    }
}

/// Assemble non-empty, non-redundant hierarchy levels below the `Geo` root.
/// A city equal to its region or country is dropped, as is a region equal
/// to its country.
fn assemble_levels(continent: &str, country: &str, region: &str, city: &str) -> Vec<String> {
    let mut levels = Vec::with_capacity(4);

    if !continent.is_empty() {
        levels.push(continent.to_string());
    }
    if !country.is_empty() {
        levels.push(country.to_string());
    }
    if !region.is_empty() && !region.eq_ignore_ascii_case(country) {
        levels.push(region.to_string());
    }
    if !city.is_empty()
        && !city.eq_ignore_ascii_case(region)
        && !city.eq_ignore_ascii_case(country)
    {
        levels.push(city.to_string());
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enricher() -> GeoEnricher {
        GeoEnricher {
            index: PlaceIndex::embedded().unwrap(),
        }
    }

    #[test]
    fn test_lookup_florence() {
        let geo = enricher().lookup(43.7696, 11.2558).unwrap();
        assert_eq!(geo.hierarchy, "Geo|Europe|Italy|Toscana|Firenze");
        assert_eq!(geo.location_hint, "Firenze, Toscana, Italy");
        assert_eq!(geo.leaf, "Firenze");
    }

    #[test]
    fn test_lookup_open_ocean_is_none() {
        assert!(enricher().lookup(0.0, -30.0).is_none());
    }

    #[test]
    fn test_hierarchy_segments_non_empty() {
        let geo = enricher().lookup(35.6762, 139.6503).unwrap();
        assert!(geo.hierarchy.starts_with("Geo|"));
        for segment in geo.hierarchy.split('|') {
            assert!(!segment.is_empty());
        }
    }

    #[test]
    fn test_redundant_city_dropped() {
        // Singapore: city == region == country-ish naming
        let levels = assemble_levels("Asia", "Singapore", "Singapore", "Singapore");
        assert_eq!(levels, vec!["Asia", "Singapore"]);
    }

    #[test]
    fn test_hint_reversed_order() {
        let levels = assemble_levels("Europe", "Italy", "Toscana", "Siena");
        let hint = levels
            .iter()
            .rev()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        assert_eq!(hint, "Siena, Toscana, Italy");
    }
}
