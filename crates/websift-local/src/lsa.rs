//! Deterministic extractive summarization (latent semantic analysis).
//!
//! Term×sentence frequency matrix → SVD → per-sentence rank
//! `sqrt(Σ σ_k² · v_k,i²)` → top-N sentences re-emitted in source order.
//! No randomness anywhere; identical input text always yields identical output.

use nalgebra::DMatrix;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::BTreeMap;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "like", "make",
    "me", "more", "most", "my", "need", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "out", "over", "own", "same", "shall", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "used",
    "using", "very", "want", "was", "we", "were", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

fn is_stop_word(w: &str) -> bool {
    STOP_WORDS.binary_search(&w).is_ok()
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences at terminal punctuation followed by whitespace,
/// and at line breaks. Intentionally simple and deterministic; "3.14" stays
/// intact because the period is not followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();

    let mut flush = |cur: &mut String, out: &mut Vec<String>| {
        let t = norm_ws(cur);
        if t.chars().any(|c| c.is_alphanumeric()) {
            out.push(t);
        }
        cur.clear();
    };

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            flush(&mut cur, &mut out);
            continue;
        }
        cur.push(c);
        if matches!(c, '.' | '!' | '?') {
            // Consume trailing closers so `word.")` ends the sentence too.
            while let Some(&n) = chars.peek() {
                if matches!(n, '"' | '\'' | ')' | ']' | '”' | '’') {
                    cur.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().map_or(true, |n| n.is_whitespace()) {
                flush(&mut cur, &mut out);
            }
        }
    }
    flush(&mut cur, &mut out);
    out
}

fn tokenize(sentence: &str, stemmer: &Stemmer) -> Vec<String> {
    sentence
        .split(|ch: char| !ch.is_alphanumeric())
        .filter_map(|t| {
            let t = t.trim().to_lowercase();
            if t.len() < 2 || is_stop_word(&t) {
                None
            } else {
                Some(stemmer.stem(&t).to_string())
            }
        })
        .collect()
}

fn sentence_ranks(token_lists: &[Vec<String>]) -> Option<Vec<f64>> {
    let n = token_lists.len();

    // Stable vocabulary order (BTreeMap) keeps the matrix, and thus the SVD,
    // identical across runs.
    let mut vocab: BTreeMap<&str, usize> = BTreeMap::new();
    for toks in token_lists {
        for t in toks {
            let next = vocab.len();
            vocab.entry(t.as_str()).or_insert(next);
        }
    }
    if vocab.is_empty() {
        return None;
    }

    let mut m = DMatrix::<f64>::zeros(vocab.len(), n);
    for (col, toks) in token_lists.iter().enumerate() {
        for t in toks {
            let row = vocab[t.as_str()];
            m[(row, col)] += 1.0;
        }
        // Normalize each sentence column by its peak term frequency so long
        // sentences do not dominate purely by length.
        let max = (0..vocab.len()).fold(0.0f64, |acc, r| acc.max(m[(r, col)]));
        if max > 0.0 {
            for r in 0..vocab.len() {
                m[(r, col)] /= max;
            }
        }
    }

    let svd = m.try_svd(false, true, 1.0e-9, 0)?;
    let v_t = svd.v_t?;
    let sigma = svd.singular_values;

    let mut ranks = vec![0.0f64; n];
    for (i, rank) in ranks.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for k in 0..sigma.len() {
            let s = sigma[k];
            let v = v_t[(k, i)];
            acc += s * s * v * v;
        }
        *rank = acc.sqrt();
    }
    Some(ranks)
}

/// Summarize `corpus` down to at most `sentence_count` sentences.
///
/// The count is a soft cap: a corpus with fewer extractable sentences returns
/// all of them. Selected sentences keep their original relative order. Empty
/// or whitespace-only input, and any internal numeric failure, yield an empty
/// string; this function never panics past its boundary.
pub fn summarize(corpus: &str, sentence_count: usize) -> String {
    if sentence_count == 0 || !corpus.chars().any(|c| !c.is_whitespace()) {
        return String::new();
    }

    let sentences = split_sentences(corpus);
    if sentences.is_empty() {
        return String::new();
    }
    if sentences.len() <= sentence_count {
        return sentences.join(" ");
    }

    let stemmer = Stemmer::create(Algorithm::English);
    let token_lists: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s, &stemmer)).collect();

    let Some(ranks) = sentence_ranks(&token_lists) else {
        // All-stop-word corpora carry no rankable signal; SVD non-convergence
        // is a genuine internal failure. Either way, degrade without throwing.
        return if token_lists.iter().all(|t| t.is_empty()) {
            sentences
                .into_iter()
                .take(sentence_count)
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            String::new()
        };
    };

    let mut order: Vec<usize> = (0..sentences.len()).collect();
    order.sort_by(|&a, &b| {
        ranks[b]
            .partial_cmp(&ranks[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    let mut selected: Vec<usize> = order.into_iter().take(sentence_count).collect();
    // Source order, not score order: reproducible and readable.
    selected.sort_unstable();

    selected
        .into_iter()
        .map(|i| sentences[i].as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "Rust is a systems programming language focused on safety. \
        The borrow checker enforces memory safety at compile time. \
        Cats are popular pets in many households. \
        Rust programs compile to efficient native code. \
        Memory safety bugs cause many security vulnerabilities. \
        The weather today is mild and sunny.";

    #[test]
    fn stop_word_list_is_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(STOP_WORDS, sorted.as_slice());
    }

    #[test]
    fn splits_sentences_on_terminal_punctuation() {
        let s = split_sentences("One here. Two there! Three? Four");
        assert_eq!(s, vec!["One here.", "Two there!", "Three?", "Four"]);
    }

    #[test]
    fn split_keeps_decimal_numbers_intact() {
        let s = split_sentences("Pi is 3.14 roughly. Next sentence.");
        assert_eq!(s.len(), 2);
        assert!(s[0].contains("3.14"));
    }

    #[test]
    fn split_treats_line_breaks_as_boundaries() {
        let s = split_sentences("first line\nsecond line\n\nthird");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn empty_and_whitespace_corpora_summarize_to_empty() {
        assert_eq!(summarize("", 5), "");
        assert_eq!(summarize("   \n\t ", 5), "");
        assert_eq!(summarize("text here.", 0), "");
    }

    #[test]
    fn sentence_count_is_a_soft_cap() {
        let out = summarize("Only one sentence here.", 50);
        assert_eq!(out, "Only one sentence here.");
    }

    #[test]
    fn summary_is_deterministic() {
        let a = summarize(CORPUS, 3);
        let b = summarize(CORPUS, 3);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn selected_sentences_preserve_source_order() {
        let out = summarize(CORPUS, 3);
        let originals = split_sentences(CORPUS);
        let picked = split_sentences(&out);
        assert_eq!(picked.len(), 3);
        let positions: Vec<usize> = picked
            .iter()
            .map(|p| originals.iter().position(|o| o == p).expect("from corpus"))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn resummarizing_a_summary_is_stable() {
        let once = summarize(CORPUS, 3);
        let twice = summarize(&once, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn stop_word_only_corpus_degrades_to_leading_sentences() {
        let out = summarize("And the. But now. Of all. For you.", 2);
        assert_eq!(out, "And the. But now.");
    }
}
