use novel_pipeline_core::chunker::{visible_text, ChunkPiece, Chunker, HtmlChunker, PlainChunker};
use proptest::prelude::*;
use proptest::test_runner::Config;

/// Every chunk, in order, appears in `normalized` with only whitespace between
/// it and its neighbours.
fn assert_ordered_cover(normalized: &str, pieces: &[ChunkPiece]) -> Result<(), TestCaseError> {
    let mut rest = normalized;
    for piece in pieces {
        rest = rest.trim_start();
        prop_assert!(
            rest.starts_with(&piece.content),
            "chunk {:?} does not continue {:?}",
            piece.content,
            rest
        );
        rest = &rest[piece.content.len()..];
    }
    prop_assert!(rest.trim().is_empty(), "unconsumed tail {:?}", rest);
    Ok(())
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

fn html_body() -> impl Strategy<Value = String> {
    let word = prop_oneof![
        4 => "[a-zA-Zàáạăâđêôơư]{1,12}",
        1 => "[a-z]{1,10}".prop_map(|w| format!("<em>{w}</em>")),
        1 => "[a-z]{1,6}".prop_map(|w| format!("{w}&amp;")),
    ];
    let paragraph = prop::collection::vec(word, 1..25).prop_map(|ws| format!("<p>{}</p>", ws.join(" ")));
    prop::collection::vec(paragraph, 1..8).prop_map(|ps| ps.join("\n"))
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    #[test]
    fn plain_chunks_fit_and_reconstruct_the_body(
        body in "[a-zA-Zđê .,!\n\t]{0,400}",
        max in 1_usize..80,
    ) {
        let pieces = PlainChunker::new(max).split(&body).expect("split");
        for piece in &pieces {
            prop_assert!(piece.char_len() <= max);
            prop_assert!(!piece.content.trim().is_empty());
        }
        assert_ordered_cover(&PlainChunker::normalize(&body), &pieces)?;
    }

    #[test]
    fn plain_chunks_keep_every_word_when_words_fit(
        body in prop::collection::vec("[a-z]{1,8}", 0..120).prop_map(|ws| ws.join(" ")),
        max in 8_usize..60,
    ) {
        let pieces = PlainChunker::new(max).split(&body).expect("split");
        let rebuilt: Vec<String> = pieces.iter().flat_map(|p| words(&p.content)).collect();
        prop_assert_eq!(rebuilt, words(&body));
        let total: i32 = pieces.iter().map(|p| p.word_count).sum();
        prop_assert_eq!(total as usize, words(&body).len());
    }

    #[test]
    fn html_chunks_fit_and_keep_the_visible_words(
        body in html_body(),
        max in 40_usize..200,
    ) {
        let pieces = HtmlChunker::new(max).split(&body).expect("split");
        for piece in &pieces {
            prop_assert!(piece.char_len() <= max, "{} > {}: {}", piece.char_len(), max, piece.content);
            prop_assert!(!piece.content.trim().is_empty());
            prop_assert_eq!(
                piece.content.matches("<p>").count(),
                piece.content.matches("</p>").count(),
                "unbalanced chunk {}", piece.content
            );
        }
        let rebuilt: Vec<String> = pieces
            .iter()
            .flat_map(|p| words(&visible_text(&p.content)))
            .collect();
        prop_assert_eq!(rebuilt, words(&visible_text(&body)));
    }

    #[test]
    fn chunking_is_deterministic(body in html_body(), max in 40_usize..120) {
        let chunker = HtmlChunker::new(max);
        prop_assert_eq!(chunker.split(&body).expect("split"), chunker.split(&body).expect("split"));
    }
}
