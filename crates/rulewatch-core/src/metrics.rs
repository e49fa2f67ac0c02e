use rand::Rng;
use serde::{Deserialize, Serialize};

/// Campaign used when a source is asked for an empty id.
pub const DEFAULT_CAMPAIGN_ID: &str = "120231398059670228";

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// The three values a condition can reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub spend: f64,
    /// Click-through rate as a percentage (0–100).
    pub ctr: f64,
    pub roas: f64,
}

// ---------------------------------------------------------------------------
// MetricRecord
// ---------------------------------------------------------------------------

/// One normalized metric sample for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub campaign_id: String,
    pub spend: f64,
    pub ctr: f64,
    pub roas: f64,
}

impl MetricRecord {
    pub fn new(campaign_id: impl Into<String>, spend: f64, ctr: f64, roas: f64) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            spend,
            ctr,
            roas,
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            spend: self.spend,
            ctr: self.ctr,
            roas: self.roas,
        }
    }

    /// Plausible stand-in values for when the real source is unavailable:
    /// whole-dollar spend in [300, 700), ctr in [0.3, 2.0] and roas in
    /// [0.5, 5.0], both rounded to two decimals.
    pub fn synthesize(campaign_id: &str) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            campaign_id: resolve_campaign_id(campaign_id),
            spend: synth_spend(&mut rng),
            ctr: synth_ctr(&mut rng),
            roas: synth_roas(&mut rng),
        }
    }

    /// Build a record from a partially valid upstream payload. Each missing,
    /// non-finite or out-of-range field is replaced on its own by a
    /// synthesized value. Valid ranges: spend >= 0, ctr in [0, 100],
    /// roas >= 0.
    pub fn normalize(requested_id: &str, partial: PartialMetricRecord) -> Self {
        let mut rng = rand::thread_rng();
        let campaign_id = partial
            .campaign_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| resolve_campaign_id(requested_id));
        Self {
            campaign_id,
            spend: within(partial.spend, 0.0, f64::MAX)
                .unwrap_or_else(|| synth_spend(&mut rng)),
            ctr: within(partial.ctr, 0.0, 100.0).unwrap_or_else(|| synth_ctr(&mut rng)),
            roas: within(partial.roas, 0.0, f64::MAX)
                .unwrap_or_else(|| synth_roas(&mut rng)),
        }
    }
}

/// Upstream metric payload as received; any field may be absent or of the
/// wrong type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialMetricRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    pub campaign_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub spend: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub ctr: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub roas: Option<f64>,
}

fn resolve_campaign_id(id: &str) -> String {
    if id.is_empty() {
        DEFAULT_CAMPAIGN_ID.to_string()
    } else {
        id.to_string()
    }
}

fn within(v: Option<f64>, min: f64, max: f64) -> Option<f64> {
    v.filter(|v| v.is_finite() && (min..=max).contains(v))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn synth_spend(rng: &mut impl Rng) -> f64 {
    rng.gen_range(300..700) as f64
}

fn synth_ctr(rng: &mut impl Rng) -> f64 {
    round2(rng.gen_range(0.3..=2.0))
}

fn synth_roas(rng: &mut impl Rng) -> f64 {
    round2(rng.gen_range(0.5..=5.0))
}

/// Deserializers that turn a wrongly typed field into `None` instead of
/// failing the whole payload.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(Value::deserialize(d)?.as_f64())
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_in_range(r: &MetricRecord) {
        assert!((300.0..700.0).contains(&r.spend), "spend {}", r.spend);
        assert_eq!(r.spend.fract(), 0.0);
        assert!((0.3..=2.0).contains(&r.ctr), "ctr {}", r.ctr);
        assert!((0.5..=5.0).contains(&r.roas), "roas {}", r.roas);
    }

    #[test]
    fn synthesized_values_stay_in_range() {
        for _ in 0..500 {
            let r = MetricRecord::synthesize("abc");
            assert_eq!(r.campaign_id, "abc");
            assert_in_range(&r);
        }
    }

    #[test]
    fn synthesize_defaults_empty_campaign_id() {
        let r = MetricRecord::synthesize("");
        assert_eq!(r.campaign_id, DEFAULT_CAMPAIGN_ID);
    }

    #[test]
    fn normalize_keeps_valid_fields() {
        let partial: PartialMetricRecord = serde_json::from_str(
            r#"{"campaign_id":"c-9","spend":812.5,"ctr":0.42,"roas":1.1}"#,
        )
        .unwrap();
        let r = MetricRecord::normalize("c-1", partial);
        assert_eq!(r, MetricRecord::new("c-9", 812.5, 0.42, 1.1));
    }

    #[test]
    fn normalize_replaces_bad_fields_individually() {
        let partial: PartialMetricRecord =
            serde_json::from_str(r#"{"spend":"lots","ctr":null,"roas":2.5,"extra":true}"#)
                .unwrap();
        let r = MetricRecord::normalize("c-1", partial);
        assert_eq!(r.campaign_id, "c-1");
        assert_eq!(r.roas, 2.5);
        assert!((300.0..700.0).contains(&r.spend));
        assert!((0.3..=2.0).contains(&r.ctr));
    }

    #[test]
    fn normalize_replaces_out_of_range_fields() {
        let partial: PartialMetricRecord =
            serde_json::from_str(r#"{"spend":-5,"ctr":250,"roas":-1}"#).unwrap();
        let r = MetricRecord::normalize("c-1", partial);
        assert_in_range(&r);

        let partial: PartialMetricRecord =
            serde_json::from_str(r#"{"spend":0,"ctr":100,"roas":0}"#).unwrap();
        let r = MetricRecord::normalize("c-1", partial);
        assert_eq!(r, MetricRecord::new("c-1", 0.0, 100.0, 0.0));
    }

    #[test]
    fn normalize_rejects_non_string_campaign_id() {
        let partial: PartialMetricRecord =
            serde_json::from_str(r#"{"campaign_id":42}"#).unwrap();
        let r = MetricRecord::normalize("c-1", partial);
        assert_eq!(r.campaign_id, "c-1");
        assert_in_range(&r);
    }

    #[test]
    fn record_serializes_with_snake_case_id() {
        let json = serde_json::to_value(MetricRecord::new("c", 1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json["campaign_id"], "c");
        assert_eq!(json["roas"], 3.0);
    }
}
