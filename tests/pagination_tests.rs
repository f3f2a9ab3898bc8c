//! End-to-end tests for cursor-driven pagination
//!
//! Covers cursor portability between managers, expiry, tampering and the
//! traversal guarantees of each strategy.

use codewindow::chunking::{Chunk, ChunkOptions, ChunkStrategy, Chunker};
use codewindow::pagination::{
    ContextManager, CursorCipher, MixedPage, PageRequest, PaginationMode, PaginationStrategy,
    Paginator, SessionStatus, SessionUpdate, SourceFile, DEFAULT_RESULT_PAGE_SIZE,
};
use codewindow::tokens::TokenEstimator;
use std::sync::Arc;
use std::time::Duration;

fn paginator_with(manager: ContextManager) -> Paginator {
    Paginator::new(Chunker::new(TokenEstimator::default()), Arc::new(manager))
}

fn paginator(secret: &str) -> Paginator {
    paginator_with(ContextManager::new(CursorCipher::from_secret(secret)))
}

fn sample_files(count: usize) -> Vec<SourceFile> {
    (0..count)
        .map(|i| SourceFile::with_content(format!("src/module_{i:02}.rs"), "fn f() {}\n".repeat(40)))
        .collect()
}

#[test]
fn test_cursor_resumes_in_a_new_manager_with_the_same_secret() {
    let files = sample_files(10);
    let request = PageRequest::new().with_page_size(4);

    let first = paginator("shared-secret")
        .paginate_files(&files, &request)
        .unwrap();
    assert_eq!(first.content.len(), 4);
    let cursor = first.cursor.clone().expect("first page has a successor");

    // A fresh manager (as after a restart) with the same key picks up the walk
    let restarted = paginator("shared-secret");
    let second = restarted
        .paginate_files(&files, &request.clone().with_cursor(Some(cursor.clone())))
        .unwrap();
    assert_eq!(second.info.current_page, 2);
    assert_eq!(second.content[0].path, "src/module_04.rs");
    assert_eq!(second.session_id, first.session_id);

    // A different key cannot open it and silently restarts
    let other = paginator("other-secret")
        .paginate_files(&files, &request.with_cursor(Some(cursor)))
        .unwrap();
    assert_eq!(other.info.current_page, 1);
    assert_eq!(other.content[0].path, "src/module_00.rs");
}

#[test]
fn test_zero_ttl_cursor_restarts_traversal() {
    let manager = ContextManager::new(CursorCipher::from_secret("ttl"))
        .with_default_ttl(Duration::ZERO);
    let paginator = paginator_with(manager);
    let files = sample_files(6);
    let request = PageRequest::new().with_page_size(2);

    let first = paginator.paginate_files(&files, &request).unwrap();
    assert!(first.has_next_page());

    let again = paginator
        .paginate_files(&files, &request.with_cursor(first.cursor))
        .unwrap();
    assert_eq!(again.info.current_page, 1);
    assert_eq!(again.content, first.content);
}

#[test]
fn test_tampered_and_garbage_cursors_restart_traversal() {
    let paginator = paginator("tamper");
    let files = sample_files(6);
    let request = PageRequest::new().with_page_size(2);
    let cursor = paginator
        .paginate_files(&files, &request)
        .unwrap()
        .cursor
        .unwrap();

    let mut tampered: Vec<char> = cursor.chars().collect();
    let mid = tampered.len() / 2;
    tampered[mid] = if tampered[mid] == 'A' { 'B' } else { 'A' };
    let tampered: String = tampered.into_iter().collect();

    for bad in [tampered.as_str(), "not a cursor", "", "AAAA"] {
        let page = paginator
            .paginate_files(&files, &request.clone().with_cursor(Some(bad.to_string())))
            .unwrap();
        assert_eq!(page.info.current_page, 1, "cursor {bad:?} should restart");
    }
}

#[test]
fn test_cursor_from_one_input_does_not_apply_to_another() {
    let paginator = paginator("inputs");
    let request = PageRequest::new().with_page_size(3);
    let cursor = paginator
        .paginate_files(&sample_files(9), &request)
        .unwrap()
        .cursor;

    let mut changed = sample_files(9);
    changed.reverse();
    let page = paginator
        .paginate_files(&changed, &request.with_cursor(cursor))
        .unwrap();
    assert_eq!(page.info.current_page, 1);
    assert_eq!(page.content[0].path, "src/module_08.rs");
}

#[test]
fn test_result_set_pages_cover_every_record() {
    let paginator = paginator("results");
    let records: Vec<u32> = (0..120).collect();

    let mut request = PageRequest::new();
    let mut collected = Vec::new();
    let mut sizes = Vec::new();
    loop {
        let page = paginator.paginate_results(&records, &request).unwrap();
        assert_eq!(page.info.mode, PaginationMode::ResultSet);
        assert_eq!(page.info.total_pages, 3);
        sizes.push(page.content.len());
        collected.extend(page.content);
        match page.cursor {
            Some(cursor) => request = request.with_cursor(Some(cursor)),
            None => break,
        }
    }

    assert_eq!(sizes, vec![DEFAULT_RESULT_PAGE_SIZE, DEFAULT_RESULT_PAGE_SIZE, 20]);
    assert_eq!(collected, records);
}

#[test]
fn test_content_cursor_is_bound_to_chunking_options() {
    let paginator = paginator("chunks");
    let body: String = (0..120).map(|i| format!("entry {i}\n")).collect();
    let file = SourceFile::with_content("log.txt", body);
    let lines = ChunkOptions::default()
        .with_strategy(ChunkStrategy::Lines)
        .with_max_tokens(40)
        .with_overlap_lines(0);

    let request = PageRequest::new().with_chunking(lines.clone());
    let first = paginator.paginate_content(&file, &request).unwrap();
    assert!(first.info.total_pages > 1);
    assert_eq!(first.info.file_id.as_deref(), Some("log.txt"));

    let resumed = paginator
        .paginate_content(&file, &request.clone().with_cursor(first.cursor.clone()))
        .unwrap();
    assert_eq!(resumed.info.current_page, 2);

    let other_options = PageRequest::new()
        .with_chunking(lines.with_max_tokens(80))
        .with_cursor(first.cursor);
    let restarted = paginator.paginate_content(&file, &other_options).unwrap();
    assert_eq!(restarted.info.current_page, 1);
}

#[test]
fn test_mixed_traversal_returns_every_file_once() {
    let paginator = paginator("mixed");
    let large: String = (0..400).map(|i| format!("row {i}: some payload\n")).collect();
    let files = vec![
        SourceFile::with_content("README.md", "# Title\n\nshort\n"),
        SourceFile::with_content("data/large.txt", large.clone()),
        SourceFile::with_size("assets/blob.bin", 400),
        SourceFile::with_content("src/lib.rs", "pub fn answer() -> u32 { 42 }\n"),
    ];
    let request = PageRequest::new()
        .with_max_tokens(300)
        .with_chunking(ChunkOptions::default().with_max_tokens(200).with_overlap_chars(0));
    let total = paginator.mixed().total_pages(&files, &request);

    let mut request = request;
    let mut whole = Vec::new();
    let mut chunked: Vec<Chunk> = Vec::new();
    let mut pages = 0;
    loop {
        let page = paginator.paginate_mixed(&files, &request).unwrap();
        pages += 1;
        assert_eq!(page.info.current_page, pages);
        match page.content {
            MixedPage::CompleteFile { path, .. } => whole.push(path),
            MixedPage::FileChunks { path, chunks, .. } => {
                assert_eq!(path, "data/large.txt");
                chunked.extend(chunks);
            }
            MixedPage::Empty => panic!("non-empty input produced an empty page"),
        }
        match page.cursor {
            Some(cursor) => request = request.with_cursor(Some(cursor)),
            None => break,
        }
    }

    assert_eq!(pages, total);
    assert_eq!(whole, vec!["README.md", "assets/blob.bin", "src/lib.rs"]);
    let rebuilt: String = chunked.iter().map(Chunk::body).collect();
    assert_eq!(rebuilt, large);
}

#[test]
fn test_sessions_track_a_long_running_analysis() {
    let manager = ContextManager::new(CursorCipher::from_secret("sessions"));
    let session = manager.create_session("dependency_scan", "./services", "directory", None);
    assert_eq!(session.status, SessionStatus::Running);
    assert!(manager
        .list_active_sessions()
        .iter()
        .any(|s| s.session_id == session.session_id));

    let done = manager
        .update_session(
            &session.session_id,
            SessionUpdate::status(SessionStatus::Completed)
                .with_progress("files_processed", serde_json::json!(12)),
        )
        .unwrap();
    assert_eq!(done.progress["files_processed"], 12);
    assert!(manager.list_active_sessions().is_empty());

    assert!(manager.cleanup_session(&session.session_id));
    assert!(manager.get_session(&session.session_id).is_none());
}
