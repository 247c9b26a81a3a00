//! Console output for finished requests.

use fusion_core::{PipelineResult, PipelineSuccess};
use thermal_common::{TileCoord, TileTemplate};

/// Tile rendered for the smoke-test line of every layer.
pub const TEST_TILE: TileCoord = TileCoord { z: 2, x: 1, y: 1 };

pub fn result_json(result: &PipelineResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

/// One line per layer with its concrete z=2/x=1/y=1 tile URL.
pub fn test_tiles(success: &PipelineSuccess) -> Vec<String> {
    success
        .tile_urls
        .iter()
        .filter_map(|(name, url)| {
            let template = TileTemplate::new(url.as_str()).ok()?;
            Some(format!("Test tile ({}): {}", name, template.tile_url(TEST_TILE)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_test_tiles() {
        let mut tile_urls = BTreeMap::new();
        tile_urls.insert("lst".to_string(), "https://t/lst/{z}/{x}/{y}".to_string());
        tile_urls.insert("broken".to_string(), "https://t/none".to_string());
        let success = PipelineSuccess {
            tile_url: "https://t/lst/{z}/{x}/{y}".to_string(),
            tile_urls,
            stats: BTreeMap::new(),
            processing_time: 0.5,
        };

        assert_eq!(
            test_tiles(&success),
            vec!["Test tile (lst): https://t/lst/2/1/1".to_string()]
        );
    }

    #[test]
    fn test_failure_json() {
        let result = PipelineResult::failure(Default::default(), "no data");
        let json = result_json(&result).unwrap();
        assert!(json.contains("\"error\": \"no data\""));
    }
}
