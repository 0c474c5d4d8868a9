//! Offline places table with a degree-cell index for nearest-city lookup.
//!
//! The embedded dataset covers major world cities; a larger CSV of the same
//! shape can be supplied via `paths.places`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::Path;

/// Curated dataset compiled into the binary.
const EMBEDDED_PLACES: &str = include_str!("places.csv");

/// A place is not matched beyond this distance; open water yields no cell.
const MAX_MATCH_KM: f64 = 150.0;

#[derive(Debug, Clone)]
pub struct Place {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub admin1: String,
    pub country_code: String,
}

/// Places bucketed into 1-degree cells keyed by (floor(lat), floor(lon)).
pub struct PlaceIndex {
    places: Vec<Place>,
    cells: HashMap<(i16, i16), Vec<u32>>,
}

impl PlaceIndex {
    /// Build the index from the compiled-in dataset.
    pub fn embedded() -> Result<Self> {
        Self::from_reader(EMBEDDED_PLACES.as_bytes())
    }

    /// Build the index from an external CSV (columns: lat,lon,city,admin1,cc).
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow!("Failed to open places dataset {}: {}", path.display(), e))?;
        Self::from_reader(file)
    }

    fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut places = Vec::new();

        for result in csv_reader.records() {
            let row = result?;
            if row.len() < 5 {
                continue;
            }
            let lat: f64 = row[0].trim().parse()?;
            let lon: f64 = row[1].trim().parse()?;
            places.push(Place {
                lat,
                lon,
                city: row[2].trim().to_string(),
                admin1: row[3].trim().to_string(),
                country_code: row[4].trim().to_string(),
            });
        }

        if places.is_empty() {
            return Err(anyhow!("Places dataset is empty"));
        }

        let mut cells: HashMap<(i16, i16), Vec<u32>> = HashMap::new();
        for (i, place) in places.iter().enumerate() {
            cells
                .entry(cell_of(place.lat, place.lon))
                .or_default()
                .push(i as u32);
        }

        Ok(Self { places, cells })
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Nearest place within the match radius, or None for open water /
    /// uncovered territory.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<&Place> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }

        let (cell_lat, cell_lon) = cell_of(lat, lon);
        let mut best: Option<(u32, f64)> = None;

        // Expand the search ring until a candidate appears; two rings cover
        // the match radius at any latitude.
        for ring in 0..=2i16 {
            for dlat in -ring..=ring {
                for dlon in -ring..=ring {
                    if dlat.abs() != ring && dlon.abs() != ring {
                        continue; // interior cells already visited
                    }
                    let key = (cell_lat + dlat, wrap_lon_cell(cell_lon + dlon));
                    let Some(indices) = self.cells.get(&key) else {
                        continue;
                    };
                    for &i in indices {
                        let place = &self.places[i as usize];
                        let dist = haversine_km(lat, lon, place.lat, place.lon);
                        if best.map_or(true, |(_, d)| dist < d) {
                            best = Some((i, dist));
                        }
                    }
                }
            }
            if let Some((_, dist)) = best {
                if dist <= MAX_MATCH_KM && ring >= 1 {
                    break;
                }
            }
        }

        match best {
            Some((i, dist)) if dist <= MAX_MATCH_KM => Some(&self.places[i as usize]),
            _ => None,
        }
    }
}

fn cell_of(lat: f64, lon: f64) -> (i16, i16) {
    (lat.floor() as i16, lon.floor() as i16)
}

fn wrap_lon_cell(cell: i16) -> i16 {
    if cell < -180 {
        cell + 360
    } else if cell >= 180 {
        cell - 360
    } else {
        cell
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_dataset_loads() {
        let index = PlaceIndex::embedded().unwrap();
        assert!(index.len() > 100);
    }

    #[test]
    fn test_nearest_florence() {
        let index = PlaceIndex::embedded().unwrap();
        let place = index.nearest(43.7696, 11.2558).unwrap();
        assert_eq!(place.city, "Firenze");
        assert_eq!(place.admin1, "Toscana");
        assert_eq!(place.country_code, "IT");
    }

    #[test]
    fn test_nearest_offset_still_matches() {
        let index = PlaceIndex::embedded().unwrap();
        // A point in the Tuscan countryside, ~25 km from Florence.
        let place = index.nearest(43.9, 11.0).unwrap();
        assert_eq!(place.country_code, "IT");
    }

    #[test]
    fn test_open_ocean_has_no_cell() {
        let index = PlaceIndex::embedded().unwrap();
        // Mid-Atlantic
        assert!(index.nearest(0.0, -30.0).is_none());
        // South Pacific
        assert!(index.nearest(-48.0, -123.0).is_none());
    }

    #[test]
    fn test_out_of_range_coordinates() {
        let index = PlaceIndex::embedded().unwrap();
        assert!(index.nearest(95.0, 0.0).is_none());
        assert!(index.nearest(0.0, 200.0).is_none());
    }

    #[test]
    fn test_haversine_known_distance() {
        // Florence to Rome is roughly 230 km
        let d = haversine_km(43.7696, 11.2558, 41.8931, 12.4828);
        assert!((d - 230.0).abs() < 20.0, "distance {d}");
    }
}
