//! End-to-end pipeline runs against an in-process fake portal.

use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration as Days, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gazette_watch::error::PortalError;
use gazette_watch::models::{Credentials, SectionCode};
use gazette_watch::pipeline::Pipeline;
use gazette_watch::session::InlabsPortal;

const TOKEN: &str = "tok-e2e-123";
const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct FakePortal {
    /// Response bodies by `dl` file name.
    files: HashMap<String, Vec<u8>>,
    logins: AtomicUsize,
    downloads: AtomicUsize,
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct DownloadQuery {
    p: String,
    dl: String,
}

async fn login(State(portal): State<Arc<FakePortal>>, Form(form): Form<LoginForm>) -> Response {
    portal.logins.fetch_add(1, Ordering::SeqCst);
    if form.email.is_empty() || form.password != PASSWORD {
        // The real portal answers 200 with an error page.
        return "<html>Usuário ou senha inválidos</html>".into_response();
    }
    (
        [(
            header::SET_COOKIE,
            format!("inlabs_session_cookie={}; Path=/", TOKEN),
        )],
        "<html>ok</html>",
    )
        .into_response()
}

async fn download(
    State(portal): State<Arc<FakePortal>>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Response {
    portal.downloads.fetch_add(1, Ordering::SeqCst);
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let origem = headers
        .get("origem")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !cookie.contains(&format!("inlabs_session_cookie={}", TOKEN)) || origem != "736372697074" {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !query.dl.starts_with(&query.p) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match portal.files.get(&query.dl) {
        Some(body) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_portal(files: HashMap<String, Vec<u8>>) -> (String, Arc<FakePortal>) {
    let state = Arc::new(FakePortal {
        files,
        ..FakePortal::default()
    });
    let app = Router::new()
        .route("/logar.php", post(login))
        .route("/index.php", get(download))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

fn tender_archive() -> Vec<u8> {
    zip_of(&[(
        "515_20240610_12345.xml",
        "<xml><article artCategory=\"Ministério da Economia/Secretaria\">\
         <body><p>Edital 123 de licitação</p></body></article>\
         <article><body><p>Contrato administrativo firmado</p></body></article></xml>",
    )])
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

fn file(date: NaiveDate, section: &str) -> String {
    format!("{}-{}.zip", date.format("%Y-%m-%d"), section)
}

fn pipeline(base_url: &str, password: &str) -> Pipeline {
    let portal = InlabsPortal::new(base_url, Duration::from_secs(5), Duration::from_secs(5));
    Pipeline::new(
        Arc::new(portal),
        Credentials::new("reader@example.com", password),
        SectionCode::ALL.to_vec(),
        2,
    )
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn single_article_pair_yields_one_match() {
    let files = HashMap::from([(file(today(), "DO1"), tender_archive())]);
    let (base, portal) = spawn_portal(files).await;

    let (matches, stats) = pipeline(&base, PASSWORD)
        .run_on(&terms(&["licitação"]), today())
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.matched_terms, vec!["licitação"]);
    assert_eq!(
        m.document.text,
        "Edital 123 de licitação Contrato administrativo firmado"
    );
    assert_eq!(m.document.section, SectionCode::Do1);
    assert_eq!(m.document.category, "Ministério da Economia/Secretaria");
    assert_eq!(m.snippets.len(), 1);
    assert!(m.snippets[0].contains("licitação"));

    assert_eq!(stats.sections_downloaded, 1);
    assert_eq!(stats.archives_downloaded, 1);
    assert_eq!(stats.markup_files_processed, 1);
    assert_eq!(stats.documents_extracted, 1);
    assert_eq!(stats.documents_searched, 1);
    assert_eq!(stats.matches_found, 1);

    assert_eq!(portal.logins.load(Ordering::SeqCst), 1);
    // Today had a publication, so only today's sections were requested.
    assert_eq!(portal.downloads.load(Ordering::SeqCst), SectionCode::ALL.len());
}

#[tokio::test]
async fn falls_back_two_days() {
    let published = today() - Days::days(2);
    let files = HashMap::from([(file(published, "DO3"), tender_archive())]);
    let (base, portal) = spawn_portal(files).await;

    let (matches, stats) = pipeline(&base, PASSWORD)
        .run_on(&terms(&["contrato"]), today())
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].document.section, SectionCode::Do3);
    assert_eq!(matches[0].matched_terms, vec!["contrato"]);
    assert_eq!(stats.archives_downloaded, 1);
    assert_eq!(
        portal.downloads.load(Ordering::SeqCst),
        SectionCode::ALL.len() * 3
    );
}

#[tokio::test]
async fn html_error_page_with_200_is_not_an_archive() {
    let yesterday = today() - Days::days(1);
    let files = HashMap::from([
        (
            file(today(), "DO1"),
            b"<html>Sessao expirada</html>".to_vec(),
        ),
        (file(yesterday, "DO2"), tender_archive()),
    ]);
    let (base, portal) = spawn_portal(files).await;

    let (matches, stats) = pipeline(&base, PASSWORD)
        .run_on(&terms(&["licitação"]), today())
        .await
        .unwrap();

    assert_eq!(stats.archives_downloaded, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].document.section, SectionCode::Do2);
    assert_eq!(
        portal.downloads.load(Ordering::SeqCst),
        SectionCode::ALL.len() * 2
    );
}

#[tokio::test]
async fn empty_term_list_makes_no_network_calls() {
    let files = HashMap::from([(file(today(), "DO1"), tender_archive())]);
    let (base, portal) = spawn_portal(files).await;

    let (matches, stats) = pipeline(&base, PASSWORD)
        .run_on(&[], today())
        .await
        .unwrap();

    assert!(matches.is_empty());
    assert_eq!(stats.sections_downloaded, 0);
    assert_eq!(stats.archives_downloaded, 0);
    assert_eq!(stats.markup_files_processed, 0);
    assert_eq!(stats.documents_extracted, 0);
    assert_eq!(stats.documents_searched, 0);
    assert_eq!(stats.matches_found, 0);
    assert_eq!(portal.logins.load(Ordering::SeqCst), 0);
    assert_eq!(portal.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn login_without_cookie_is_an_auth_error() {
    let files = HashMap::from([(file(today(), "DO1"), tender_archive())]);
    let (base, portal) = spawn_portal(files).await;

    let err = pipeline(&base, "wrong password")
        .run_on(&terms(&["licitação"]), today())
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::Auth), "got {:?}", err);
    assert_eq!(portal.logins.load(Ordering::SeqCst), 1);
    assert_eq!(portal.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn nothing_published_in_window_is_empty_not_error() {
    let (base, portal) = spawn_portal(HashMap::new()).await;

    let (matches, stats) = pipeline(&base, PASSWORD)
        .run_on(&terms(&["licitação"]), today())
        .await
        .unwrap();

    assert!(matches.is_empty());
    assert_eq!(stats.archives_downloaded, 0);
    assert_eq!(stats.matches_found, 0);
    assert_eq!(
        portal.downloads.load(Ordering::SeqCst),
        SectionCode::ALL.len() * 3
    );
}

#[tokio::test]
async fn unreachable_portal_is_a_transport_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = pipeline(&format!("http://{}", addr), PASSWORD)
        .run_on(&terms(&["licitação"]), today())
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::Transport(_)), "got {:?}", err);
}
