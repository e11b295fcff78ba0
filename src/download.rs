//! Multi-day fallback download.
//!
//! Authenticates once, then walks a window of calendar days starting today
//! and moving backwards. For each day every configured section is fetched;
//! only bodies that begin with the ZIP signature are kept. The first day that
//! yields at least one archive wins. An empty window is not an error: the
//! gazette may simply not publish on those days.

use chrono::{Duration, Local, NaiveDate};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::PortalError;
use crate::models::{Archive, Credentials, SectionCode, SectionRequest};
use crate::session::{Portal, SectionFetcher};

/// ZIP local-file-header signature prefix.
pub const ZIP_SIGNATURE: &[u8] = b"PK";

/// True when `bytes` starts with the ZIP signature.
///
/// The portal misreports error pages as HTTP 200, so this check, not the
/// status code, decides whether a body is an archive.
pub fn is_valid_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_SIGNATURE)
}

/// Authenticate and download the most recent published day, looking back at
/// most `max_fallback_days` days from the local date.
pub async fn download_for_today(
    portal: &dyn Portal,
    credentials: &Credentials,
    sections: &[SectionCode],
    max_fallback_days: u32,
) -> Result<BTreeMap<SectionCode, Archive>, PortalError> {
    let today = Local::now().date_naive();
    let fetcher = portal.authenticate(credentials).await?;
    Ok(download_window(fetcher.as_ref(), sections, max_fallback_days, today).await)
}

/// Walk `today`, `today - 1`, ... `today - max_fallback_days` and return the
/// first non-empty day's archives, keyed by section.
pub async fn download_window(
    fetcher: &dyn SectionFetcher,
    sections: &[SectionCode],
    max_fallback_days: u32,
    today: NaiveDate,
) -> BTreeMap<SectionCode, Archive> {
    for days_back in 0..=max_fallback_days {
        let date = today - Duration::days(i64::from(days_back));
        if days_back == 0 {
            info!(date = %date, "checking gazette for today");
        } else {
            info!(date = %date, days_back, "falling back to an earlier day");
        }

        let archives = download_for_date(fetcher, date, sections).await;
        if !archives.is_empty() {
            info!(date = %date, archives = archives.len(), "gazette found");
            return archives;
        }
        warn!(date = %date, "no valid archives for date");
    }

    warn!(
        days = max_fallback_days + 1,
        "no gazette published in the fallback window"
    );
    BTreeMap::new()
}

/// Fetch every section for one date, keeping only valid archives.
pub async fn download_for_date(
    fetcher: &dyn SectionFetcher,
    date: NaiveDate,
    sections: &[SectionCode],
) -> BTreeMap<SectionCode, Archive> {
    let mut archives = BTreeMap::new();

    for &section in sections {
        let request = SectionRequest::new(date, section);
        let Some(bytes) = fetcher.fetch(&request).await else {
            continue;
        };
        if !is_valid_archive(&bytes) {
            warn!(
                file = %request.file_name(),
                bytes = bytes.len(),
                "response is not a ZIP archive, discarding"
            );
            continue;
        }
        archives.insert(section, Archive { request, bytes });
    }

    archives
}
