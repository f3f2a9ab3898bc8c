//! Property-based tests for chunking and pagination
//!
//! These check the structural invariants that every traversal relies on:
//! chunk bodies tile the input, and page walks visit every item exactly once.

use codewindow::chunking::{reconstruct, ChunkOptions, ChunkStrategy, Chunker};
use codewindow::pagination::{
    ContextManager, CursorCipher, PageRequest, Paginator, SourceFile,
};
use codewindow::tokens::TokenEstimator;
use proptest::prelude::*;
use std::sync::Arc;

fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("def handler(event):\n".to_string()),
        Just("    return event\n".to_string()),
        Just("class Widget:\n".to_string()),
        Just("fn main() {\n".to_string()),
        Just("}\n".to_string()),
        Just("# Overview\n".to_string()),
        Just("\n".to_string()),
        Just("    let total = values.iter().sum::<u32>();\n".to_string()),
        "[a-zA-Z0-9 ,.;(){}]{0,120}\n",
        "[a-z ]{200,400}",
        Just("µ-émoji 🚀 text\n".to_string()),
    ]
}

fn content_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(line_strategy(), 1..60).prop_map(|lines| lines.concat())
}

fn chunk_strategy() -> impl Strategy<Value = ChunkStrategy> {
    prop_oneof![
        Just(ChunkStrategy::Smart),
        Just(ChunkStrategy::Lines),
        Just(ChunkStrategy::Functions),
        Just(ChunkStrategy::Classes),
        Just(ChunkStrategy::Sections),
        Just(ChunkStrategy::Tokens),
    ]
}

fn file_id_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("src/handler.py"),
        Just("src/main.rs"),
        Just("docs/guide.md"),
        Just("notes.txt"),
        Just("data.json"),
    ]
}

fn paginator() -> Paginator {
    let contexts = Arc::new(ContextManager::new(CursorCipher::from_secret("property-tests")));
    Paginator::new(Chunker::new(TokenEstimator::default()), contexts)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_chunk_bodies_reconstruct_input(
        content in content_strategy(),
        strategy in chunk_strategy(),
        file_id in file_id_strategy(),
        max_tokens in 1usize..300,
        overlap in 0usize..5,
    ) {
        let options = ChunkOptions::default()
            .with_strategy(strategy)
            .with_max_tokens(max_tokens)
            .with_overlap_lines(overlap);
        let chunks = Chunker::default().chunk(file_id, &content, &options);

        prop_assert!(!chunks.is_empty());
        prop_assert_eq!(reconstruct(&chunks), content.clone());
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.metadata.index, i);
            prop_assert!(chunk.metadata.start_line <= chunk.metadata.end_line);
            prop_assert!(!chunk.body().is_empty());
        }
        for pair in chunks.windows(2) {
            prop_assert!(pair[0].metadata.end_line <= pair[1].metadata.start_line);
        }
    }

    #[test]
    fn prop_file_pages_visit_each_file_once(
        sizes in prop::collection::vec(0usize..4000, 0..40),
        page_size in prop::option::of(1usize..8),
        max_tokens in 50usize..2000,
    ) {
        let files: Vec<SourceFile> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| SourceFile::with_content(format!("file_{i:03}.txt"), "x".repeat(*size)))
            .collect();
        let paginator = paginator();
        let mut request = PageRequest::new().with_max_tokens(max_tokens);
        if let Some(page_size) = page_size {
            request = request.with_page_size(page_size);
        }

        let mut seen = Vec::new();
        let mut pages = 0;
        let mut expected_total = None;
        loop {
            let page = paginator.paginate_files(&files, &request).unwrap();
            pages += 1;
            prop_assert_eq!(page.current_page(), pages);
            match expected_total {
                None => expected_total = Some(page.total_pages()),
                Some(total) => prop_assert_eq!(page.total_pages(), total),
            }
            if let Some(limit) = page_size {
                prop_assert!(page.content.len() <= limit);
            }
            seen.extend(page.content.iter().map(|entry| entry.path.clone()));
            match page.cursor {
                Some(cursor) => request = request.with_cursor(Some(cursor)),
                None => break,
            }
            prop_assert!(pages <= files.len());
        }

        let expected: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        prop_assert_eq!(seen, expected);
        if !files.is_empty() {
            prop_assert_eq!(expected_total, Some(pages));
        }
    }
}
