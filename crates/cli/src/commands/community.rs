use std::fs;
use std::path::Path;

use anyhow::Context;
use resq_core::community::geo::{within_radius, Coordinate, Located};
use resq_core::community::{rank, CitizenScore};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::commands::CommandResult;

/// A named place read from a points file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NamedPoint {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Located for NamedPoint {
    fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude?, self.longitude?).ok()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("could not parse `{}`", path.display()))
}

pub fn leaderboard(path: &Path, limit: usize) -> CommandResult {
    let scores = match read_json::<Vec<CitizenScore>>(path) {
        Ok(scores) => scores,
        Err(error) => {
            return CommandResult::failure("leaderboard", "input", format!("{error:#}"), 2)
        }
    };

    let entries = rank(&scores, limit);
    CommandResult::success_with_details(
        "leaderboard",
        format!("ranked {} of {} citizens", entries.len(), scores.len()),
        Some(json!({ "entries": entries })),
    )
}

pub fn nearby(path: &Path, latitude: f64, longitude: f64, radius_km: f64) -> CommandResult {
    let centre = match Coordinate::new(latitude, longitude) {
        Ok(centre) => centre,
        Err(error) => return CommandResult::failure("nearby", "input", error.to_string(), 2),
    };
    let points = match read_json::<Vec<NamedPoint>>(path) {
        Ok(points) => points,
        Err(error) => return CommandResult::failure("nearby", "input", format!("{error:#}"), 2),
    };

    let matches = match within_radius(&points, centre, radius_km) {
        Ok(matches) => matches,
        Err(error) => return CommandResult::failure("nearby", "input", error.to_string(), 2),
    };
    let results = matches
        .iter()
        .map(|(point, distance)| {
            json!({
                "name": point.name,
                "distance_km": (distance * 100.0).round() / 100.0,
            })
        })
        .collect::<Vec<_>>();

    CommandResult::success_with_details(
        "nearby",
        format!("{} of {} places within {radius_km} km", results.len(), points.len()),
        Some(json!({ "results": results })),
    )
}
