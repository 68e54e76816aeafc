use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Editorial authority priors. Primary regulators and top global wires rank
/// highest; everything else gets the default.
const SOURCE_WEIGHTS: &[(&str, f64)] = &[
    ("sec.gov", 1.0),
    ("reuters.com", 0.9),
    ("bloomberg.com", 0.9),
    ("ft.com", 0.85),
    ("wsj.com", 0.85),
    ("cnbc.com", 0.8),
];
const DEFAULT_SOURCE_WEIGHT: f64 = 0.5;

/// A story is "new" for this many hours, after which novelty collapses.
const NOVELTY_WINDOW_HOURS: f64 = 6.0;

#[derive(Debug, Clone, Serialize)]
pub struct HotnessFactors {
    pub novelty: f64,
    pub source: f64,
    pub velocity: f64,
    pub confirmation: f64,
    pub materiality: f64,
    pub breadth: f64,
}

/// Registrable domain of a url or bare host, reduced to the last two
/// dot-labels. Public suffixes like co.uk collapse to the suffix itself;
/// that matches the scorer this weight table was tuned against.
pub fn registrable_domain(site_or_url: &str) -> String {
    let host = if site_or_url.contains("://") {
        url::Url::parse(site_or_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| site_or_url.to_string())
    } else {
        site_or_url.to_string()
    };

    let host = host.trim().trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host
    }
}

pub fn source_weight(site_or_url: &str) -> f64 {
    let domain = registrable_domain(site_or_url);
    SOURCE_WEIGHTS
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, w)| *w)
        .unwrap_or(DEFAULT_SOURCE_WEIGHT)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Multi-factor hotness of a cluster given its current aggregates.
/// Materiality and breadth are fixed placeholders so scores stay comparable
/// with the historical table.
pub fn compute(
    first_time: NaiveDateTime,
    domains: &BTreeMap<String, i64>,
    now: NaiveDateTime,
) -> (HotnessFactors, f64) {
    let age_hours = (now - first_time).num_seconds() as f64 / 3600.0;
    let novelty = if age_hours <= NOVELTY_WINDOW_HOURS {
        1.0
    } else {
        0.3
    };

    let source = domains
        .keys()
        .map(|d| source_weight(d))
        .fold(0.0f64, f64::max);

    let doc_count: i64 = domains.values().sum();
    let velocity = sigmoid(((doc_count + 1) as f64).ln());
    let confirmation = (domains.len() as f64 / 4.0).min(1.0);
    let materiality = 0.3;
    let breadth = 0.0;

    let factors = HotnessFactors {
        novelty,
        source,
        velocity,
        confirmation,
        materiality,
        breadth,
    };

    let hotness = 0.30 * factors.novelty
        + 0.20 * factors.source
        + 0.20 * factors.velocity
        + 0.15 * factors.confirmation
        + 0.10 * factors.materiality
        + 0.05 * factors.breadth;

    (factors, hotness)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn domains(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(d, n)| (d.to_string(), *n))
            .collect()
    }

    #[test]
    fn registrable_domain_handles_urls_and_hosts() {
        assert_eq!(
            registrable_domain("https://www.reuters.com/markets/fed"),
            "reuters.com"
        );
        assert_eq!(registrable_domain("feeds.bloomberg.com"), "bloomberg.com");
        assert_eq!(registrable_domain("sec.gov"), "sec.gov");
        assert_eq!(registrable_domain("localhost"), "localhost");
        // Known simplification: public suffixes collapse to the suffix.
        assert_eq!(registrable_domain("news.bbc.co.uk"), "co.uk");
    }

    #[test]
    fn unknown_sources_get_default_weight() {
        assert_eq!(source_weight("sec.gov"), 1.0);
        assert_eq!(source_weight("https://example.org/a"), 0.5);
    }

    #[test]
    fn hotness_is_bounded() {
        let domains = domains(&[
            ("sec.gov", 40),
            ("reuters.com", 40),
            ("bloomberg.com", 40),
            ("ft.com", 40),
            ("wsj.com", 40),
        ]);
        let (_, hotness) = compute(t0(), &domains, t0());
        assert!((0.0..=1.0).contains(&hotness));

        let (_, cold) = compute(t0(), &BTreeMap::new(), t0() + Duration::days(30));
        assert!((0.0..=1.0).contains(&cold));
    }

    #[test]
    fn novelty_decays_after_six_hours() {
        let domains = domains(&[("sec.gov", 1)]);

        let (fresh_factors, fresh) = compute(t0(), &domains, t0() + Duration::hours(1));
        assert_eq!(fresh_factors.novelty, 1.0);

        let (stale_factors, stale) = compute(t0(), &domains, t0() + Duration::hours(7));
        assert_eq!(stale_factors.novelty, 0.3);

        // Only novelty changed, so the drop is exactly its weighted delta.
        assert!((fresh - stale - 0.30 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn confirmation_saturates_at_four_domains() {
        let one = domains(&[("a.com", 1)]);
        let five = domains(&[
            ("a.com", 1),
            ("b.com", 1),
            ("c.com", 1),
            ("d.com", 1),
            ("e.com", 1),
        ]);
        let (f1, _) = compute(t0(), &one, t0());
        let (f5, _) = compute(t0(), &five, t0());
        assert_eq!(f1.confirmation, 0.25);
        assert_eq!(f5.confirmation, 1.0);
    }

    #[test]
    fn velocity_grows_with_doc_count() {
        let few = domains(&[("a.com", 1)]);
        let many = domains(&[("a.com", 50)]);
        let (f_few, _) = compute(t0(), &few, t0());
        let (f_many, _) = compute(t0(), &many, t0());
        assert!(f_many.velocity > f_few.velocity);
        assert!(f_many.velocity < 1.0);
    }
}
