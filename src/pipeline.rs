//! Download → extract → match, as one call.
//!
//! ```text
//! terms ──► normalize ──► authenticate ──► fallback download ──► extract ──► match
//!                │                                                              │
//!                └── empty: return ([], zero stats), no network ◄───────────────┘
//! ```
//!
//! Only a failed login escapes [`Pipeline::run`]. "Nothing published in the
//! window" and "nothing matched" both come back as an empty match list.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::PortalConfig;
use crate::download::download_window;
use crate::error::PortalError;
use crate::extract::extract;
use crate::matcher::{find_matches, normalize_terms};
use crate::models::{Credentials, Match, PipelineStats, SectionCode};
use crate::session::{InlabsPortal, Portal};

pub struct Pipeline {
    portal: Arc<dyn Portal>,
    credentials: Credentials,
    sections: Vec<SectionCode>,
    max_fallback_days: u32,
}

impl Pipeline {
    pub fn new(
        portal: Arc<dyn Portal>,
        credentials: Credentials,
        sections: Vec<SectionCode>,
        max_fallback_days: u32,
    ) -> Self {
        Self {
            portal,
            credentials,
            sections,
            max_fallback_days,
        }
    }

    /// Pipeline over the real portal client.
    pub fn from_config(config: &PortalConfig, credentials: Credentials) -> Self {
        Self::new(
            Arc::new(InlabsPortal::from_config(config)),
            credentials,
            config.sections.clone(),
            config.max_fallback_days,
        )
    }

    /// Run against the local calendar date.
    pub async fn run(&self, terms: &[String]) -> Result<(Vec<Match>, PipelineStats), PortalError> {
        self.run_on(terms, Local::now().date_naive()).await
    }

    /// Run with the fallback window anchored at `today`.
    ///
    /// Each call authenticates its own session.
    pub async fn run_on(
        &self,
        terms: &[String],
        today: NaiveDate,
    ) -> Result<(Vec<Match>, PipelineStats), PortalError> {
        let terms = normalize_terms(terms);
        let mut stats = PipelineStats::default();
        if terms.is_empty() {
            info!("no watch terms, skipping run");
            return Ok((Vec::new(), stats));
        }

        let started = Instant::now();
        let fetcher = self.portal.authenticate(&self.credentials).await?;
        let archives = download_window(
            fetcher.as_ref(),
            &self.sections,
            self.max_fallback_days,
            today,
        )
        .await;
        stats.download_secs = elapsed_secs(started);
        stats.sections_downloaded = archives.len();
        stats.archives_downloaded = archives.len();

        let started = Instant::now();
        let extraction = extract(&archives);
        stats.extract_secs = elapsed_secs(started);
        stats.markup_files_processed = extraction.markup_files;
        stats.documents_extracted = extraction.documents.len();

        let started = Instant::now();
        let matches = find_matches(&extraction.documents, &terms);
        stats.search_secs = elapsed_secs(started);
        stats.documents_searched = extraction.documents.len();
        stats.matches_found = matches.len();

        info!(
            archives = stats.archives_downloaded,
            documents = stats.documents_extracted,
            matches = stats.matches_found,
            "pipeline run complete"
        );
        Ok((matches, stats))
    }
}

/// Seconds since `started`, rounded to hundredths.
fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionRequest;
    use crate::session::SectionFetcher;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::SimpleFileOptions;

    fn archive_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        buf.into_inner()
    }

    /// Portal double: counts logins, serves one archive for DO1 on `date`.
    struct FakePortal {
        logins: AtomicUsize,
        accept: bool,
        date: NaiveDate,
        body: Vec<u8>,
    }

    struct FakeFetcher {
        date: NaiveDate,
        body: Vec<u8>,
    }

    #[async_trait]
    impl Portal for FakePortal {
        async fn authenticate(
            &self,
            _credentials: &Credentials,
        ) -> Result<Box<dyn SectionFetcher>, PortalError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if !self.accept {
                return Err(PortalError::Auth);
            }
            Ok(Box::new(FakeFetcher {
                date: self.date,
                body: self.body.clone(),
            }))
        }
    }

    #[async_trait]
    impl SectionFetcher for FakeFetcher {
        async fn fetch(&self, request: &SectionRequest) -> Option<Vec<u8>> {
            (request.date == self.date && request.section == SectionCode::Do1)
                .then(|| self.body.clone())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn pipeline(portal: Arc<FakePortal>) -> Pipeline {
        Pipeline::new(
            portal,
            Credentials::new("user@example.com", "secret"),
            SectionCode::ALL.to_vec(),
            2,
        )
    }

    fn fake(accept: bool, date: NaiveDate) -> Arc<FakePortal> {
        let xml = "<xml><article artCategory=\"Licitação\"><p>Edital 123 de licitação</p></article>\
                   <article><p>Contrato administrativo firmado</p></article></xml>";
        Arc::new(FakePortal {
            logins: AtomicUsize::new(0),
            accept,
            date,
            body: archive_with(&[("act.xml", xml)]),
        })
    }

    #[tokio::test]
    async fn finds_match_in_fallback_day() {
        let portal = fake(true, today() - chrono::Duration::days(2));
        let (matches, stats) = pipeline(portal.clone())
            .run_on(&["licitação".to_string()], today())
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_terms, vec!["licitação"]);
        assert_eq!(
            matches[0].document.text,
            "Edital 123 de licitação Contrato administrativo firmado"
        );
        assert_eq!(matches[0].document.category, "Licitação");
        assert_eq!(stats.archives_downloaded, 1);
        assert_eq!(stats.sections_downloaded, stats.archives_downloaded);
        assert_eq!(stats.markup_files_processed, 1);
        assert_eq!(stats.documents_extracted, 1);
        assert_eq!(stats.documents_searched, 1);
        assert_eq!(stats.matches_found, 1);
        assert_eq!(portal.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_terms_skip_the_portal() {
        let portal = fake(true, today());
        let (matches, stats) = pipeline(portal.clone())
            .run_on(&[" ".to_string()], today())
            .await
            .unwrap();

        assert!(matches.is_empty());
        assert_eq!(stats, PipelineStats::default());
        assert_eq!(portal.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auth_failure_propagates() {
        let portal = fake(false, today());
        let err = pipeline(portal)
            .run_on(&["licitação".to_string()], today())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Auth));
    }

    #[tokio::test]
    async fn nothing_published_is_an_empty_result() {
        let portal = fake(true, today() - chrono::Duration::days(5));
        let (matches, stats) = pipeline(portal)
            .run_on(&["licitação".to_string()], today())
            .await
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(stats.archives_downloaded, 0);
        assert_eq!(stats.documents_extracted, 0);
    }

    #[test]
    fn elapsed_is_rounded_to_hundredths() {
        let secs = elapsed_secs(Instant::now());
        assert_eq!(secs, (secs * 100.0).round() / 100.0);
    }
}
