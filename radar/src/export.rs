//! Top-K cluster snapshot: the JSON shape consumed by the static dashboard
//! and by anyone polling `/api/clusters/snapshot`.

use chrono::{NaiveDateTime, Utc};
use diesel_async::AsyncPgConnection;
use serde::Serialize;

use crate::models::cluster::ClusterMember;
use crate::store;

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub clusters: Vec<ClusterExport>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotMeta {
    pub generated_at: String,
    pub top_k: i64,
    pub window_hours: i64,
}

#[derive(Debug, Serialize)]
pub struct ClusterExport {
    pub dedup_group: i32,
    pub headline: String,
    pub hotness: f64,
    pub sources: Vec<SourceLink>,
    pub timeline: Timeline,
    pub domains: Vec<String>,
    pub doc_count: i32,
    pub factors: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SourceLink {
    pub kind: &'static str,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct Timeline {
    pub first: NaiveDateTime,
    pub update: NaiveDateTime,
    pub confirm: Option<NaiveDateTime>,
}

/// The hottest clusters still moving inside the window, with their
/// earliest/latest/strongest links and a confirmation timestamp.
pub async fn build_snapshot(
    conn: &mut AsyncPgConnection,
    top_k: i64,
    window_hours: i64,
) -> Result<Snapshot, eyre::Error> {
    let since = Utc::now().naive_utc() - chrono::Duration::hours(window_hours);
    let clusters = store::clusters::top_clusters_since(conn, since, top_k).await?;

    let mut exports = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let mut sources = Vec::new();
        if let Some(url) = &cluster.earliest_url {
            sources.push(SourceLink {
                kind: "earliest",
                url: url.clone(),
            });
        }
        if let Some(url) = &cluster.latest_url {
            sources.push(SourceLink {
                kind: "latest",
                url: url.clone(),
            });
        }
        if let Some(domain) = &cluster.strongest_domain
            && let Some(url) = store::clusters::latest_url_for_site(conn, cluster.id, domain).await?
        {
            sources.push(SourceLink {
                kind: "strongest",
                url,
            });
        }

        let members = store::clusters::members_of(conn, cluster.id).await?;
        let timeline = Timeline {
            first: cluster.first_time,
            update: cluster.last_time,
            confirm: confirmation_time(&members),
        };

        exports.push(ClusterExport {
            dedup_group: cluster.id,
            headline: cluster.headline.clone(),
            hotness: (cluster.hotness * 1000.0).round() / 1000.0,
            sources,
            timeline,
            domains: cluster.domain_counts().keys().cloned().collect(),
            doc_count: cluster.doc_count,
            factors: cluster.factors.clone(),
        });
    }

    Ok(Snapshot {
        meta: SnapshotMeta {
            generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            top_k,
            window_hours,
        },
        clusters: exports,
    })
}

/// A story counts as confirmed when a second distinct site first reports it.
fn confirmation_time(members: &[ClusterMember]) -> Option<NaiveDateTime> {
    let mut seen = std::collections::HashSet::new();
    for member in members {
        if !seen.is_empty() && !seen.contains(member.site.as_str()) {
            return Some(member.time_utc);
        }
        seen.insert(member.site.as_str());
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn member(site: &str, minute: u32) -> ClusterMember {
        ClusterMember {
            cluster_id: 1,
            normalized_id: minute as i32,
            url: None,
            site: site.to_string(),
            time_utc: NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(9, minute, 0)
                .unwrap(),
        }
    }

    #[test]
    fn confirm_is_first_second_site_report() {
        let members = vec![
            member("reuters.com", 0),
            member("reuters.com", 5),
            member("bloomberg.com", 10),
            member("ft.com", 15),
        ];
        assert_eq!(
            confirmation_time(&members),
            Some(member("bloomberg.com", 10).time_utc)
        );
    }

    #[test]
    fn single_site_story_is_unconfirmed() {
        let members = vec![member("reuters.com", 0), member("reuters.com", 9)];
        assert_eq!(confirmation_time(&members), None);
    }

    #[test]
    fn empty_cluster_is_unconfirmed() {
        assert_eq!(confirmation_time(&[]), None);
    }
}
