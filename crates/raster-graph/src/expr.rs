//! The immutable computation graph.
//!
//! Nodes are plain data: they serialize to the JSON wire format sent to a
//! remote backend and are pattern-matched by the local evaluator. Sub-trees
//! are shared through `Arc`, so composing transforms never copies a graph.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thermal_common::{CrsCode, DateRange};

/// Identifies one band of a published image collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Collection id, e.g. `MODIS/061/MOD11A1`
    pub id: String,
    /// Band selected from every image
    pub band: String,
    /// Project the computation is billed to
    pub project: String,
}

/// A non-mutating collection filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionFilter {
    /// Keep observations acquired inside the range (both ends inclusive).
    Date { range: DateRange },
    /// Keep observations whose property equals the value.
    PropertyEq { name: String, value: String },
}

impl CollectionFilter {
    /// Render the filter in the half-open `[start, end)` form remote filters expect.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            CollectionFilter::Date { range } => serde_json::json!({
                "type": "date",
                "start": range.start.to_string(),
                "end": range.end_exclusive().to_string(),
            }),
            CollectionFilter::PropertyEq { name, value } => serde_json::json!({
                "type": "eq",
                "name": name,
                "value": value,
            }),
        }
    }
}

/// A filtered view of a source collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionExpr {
    pub source: SourceRef,
    pub filters: Vec<CollectionFilter>,
}

impl CollectionExpr {
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source,
            "filters": self.filters.iter().map(CollectionFilter::to_wire).collect::<Vec<_>>(),
        })
    }
}

/// Per-pixel (over a collection) or per-region (over a field) reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Mean,
    StdDev,
    Min,
    Max,
}

impl Reducer {
    /// Suffix appended to the band name of a reduced collection.
    pub fn band_suffix(&self) -> Option<&'static str> {
        match self {
            Reducer::Mean => None,
            Reducer::StdDev => Some("stdDev"),
            Reducer::Min => Some("min"),
            Reducer::Max => Some("max"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Apply the operator. Non-finite results (division by zero) are masked.
    pub fn apply(&self, lhs: f64, rhs: f64) -> Option<f64> {
        let value = match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Subtract => lhs - rhs,
            BinaryOp::Multiply => lhs * rhs,
            BinaryOp::Divide => lhs / rhs,
        };
        value.is_finite().then_some(value)
    }
}

/// Right-hand side of a binary operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Field(Arc<FieldExpr>),
    Scalar(f64),
}

/// A node producing one single-band raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum FieldExpr {
    /// Per-pixel reduction across every observation of a collection.
    Reduce {
        collection: CollectionExpr,
        reducer: Reducer,
    },
    /// Per-pixel mean of several fields, ignoring masked inputs.
    MeanOf { fields: Vec<Arc<FieldExpr>> },
    /// Fill masked pixels of `field` from `fallback`.
    Unmask {
        field: Arc<FieldExpr>,
        fallback: Arc<FieldExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Arc<FieldExpr>,
        rhs: Operand,
    },
    /// 1 where `field > threshold`, 0 elsewhere, masked where `field` is.
    GreaterThan {
        field: Arc<FieldExpr>,
        threshold: f64,
    },
    /// Mask `field` wherever `mask` is zero or masked.
    UpdateMask {
        field: Arc<FieldExpr>,
        mask: Arc<FieldExpr>,
    },
    /// Resample onto another grid.
    Reproject {
        field: Arc<FieldExpr>,
        crs: CrsCode,
        scale: f64,
    },
    Rename { field: Arc<FieldExpr>, band: String },
}

impl FieldExpr {
    /// JSON wire form, with date filters rendered half-open.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            FieldExpr::Reduce {
                collection,
                reducer,
            } => serde_json::json!({
                "op": "reduce",
                "collection": collection.to_wire(),
                "reducer": reducer,
            }),
            FieldExpr::MeanOf { fields } => serde_json::json!({
                "op": "mean_of",
                "fields": fields.iter().map(|f| f.to_wire()).collect::<Vec<_>>(),
            }),
            FieldExpr::Unmask { field, fallback } => serde_json::json!({
                "op": "unmask",
                "field": field.to_wire(),
                "fallback": fallback.to_wire(),
            }),
            FieldExpr::Binary { op, lhs, rhs } => {
                let rhs = match rhs {
                    Operand::Field(field) => serde_json::json!({"kind": "field", "value": field.to_wire()}),
                    Operand::Scalar(value) => serde_json::json!({"kind": "scalar", "value": value}),
                };
                serde_json::json!({"op": "binary", "operator": op, "lhs": lhs.to_wire(), "rhs": rhs})
            }
            FieldExpr::GreaterThan { field, threshold } => serde_json::json!({
                "op": "greater_than",
                "field": field.to_wire(),
                "threshold": threshold,
            }),
            FieldExpr::UpdateMask { field, mask } => serde_json::json!({
                "op": "update_mask",
                "field": field.to_wire(),
                "mask": mask.to_wire(),
            }),
            FieldExpr::Reproject { field, crs, scale } => serde_json::json!({
                "op": "reproject",
                "field": field.to_wire(),
                "crs": crs,
                "scale": scale,
                "resample": "bilinear",
            }),
            FieldExpr::Rename { field, band } => serde_json::json!({
                "op": "rename",
                "field": field.to_wire(),
                "band": band,
            }),
        }
    }

    /// Number of nodes in the tree, counting shared sub-trees each time they appear.
    pub fn node_count(&self) -> usize {
        1 + match self {
            FieldExpr::Reduce { .. } => 0,
            FieldExpr::MeanOf { fields } => fields.iter().map(|f| f.node_count()).sum(),
            FieldExpr::Unmask { field, fallback } => field.node_count() + fallback.node_count(),
            FieldExpr::Binary { lhs, rhs, .. } => {
                lhs.node_count()
                    + match rhs {
                        Operand::Field(field) => field.node_count(),
                        Operand::Scalar(_) => 0,
                    }
            }
            FieldExpr::GreaterThan { field, .. }
            | FieldExpr::Reproject { field, .. }
            | FieldExpr::Rename { field, .. } => field.node_count(),
            FieldExpr::UpdateMask { field, mask } => field.node_count() + mask.node_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn source() -> SourceRef {
        SourceRef {
            id: "ECMWF/ERA5_LAND/DAILY_AGGR".to_string(),
            band: "temperature_2m".to_string(),
            project: "test".to_string(),
        }
    }

    #[test]
    fn test_date_filter_wire_is_half_open() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap(),
        )
        .unwrap();
        let wire = CollectionFilter::Date { range }.to_wire();
        assert_eq!(wire["start"], "2023-02-01");
        assert_eq!(wire["end"], "2023-03-01");
    }

    #[test]
    fn test_divide_by_zero_is_masked() {
        assert_eq!(BinaryOp::Divide.apply(1.0, 0.0), None);
        assert_eq!(BinaryOp::Divide.apply(0.0, 0.0), None);
        assert_eq!(BinaryOp::Divide.apply(3.0, 2.0), Some(1.5));
        assert_eq!(BinaryOp::Subtract.apply(3.0, 2.0), Some(1.0));
    }

    #[test]
    fn test_graph_serde_roundtrip_and_wire() {
        let reduce = Arc::new(FieldExpr::Reduce {
            collection: CollectionExpr {
                source: source(),
                filters: vec![CollectionFilter::PropertyEq {
                    name: "model".to_string(),
                    value: "ACCESS-CM2".to_string(),
                }],
            },
            reducer: Reducer::Mean,
        });
        let expr = FieldExpr::Binary {
            op: BinaryOp::Subtract,
            lhs: reduce.clone(),
            rhs: Operand::Scalar(273.15),
        };

        let json = serde_json::to_string(&expr).unwrap();
        let back: FieldExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        let tagged: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(tagged["node"], "binary");
        assert_eq!(tagged["op"], "subtract");
        assert_eq!(expr.node_count(), 2);

        let wire = expr.to_wire();
        assert_eq!(wire["op"], "binary");
        assert_eq!(wire["rhs"]["kind"], "scalar");
        assert_eq!(wire["lhs"]["collection"]["filters"][0]["type"], "eq");
    }
}
