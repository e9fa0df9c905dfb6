use std::collections::BTreeMap;
use std::io::{self, BufReader, Cursor, Read};
use std::time::{Duration, Instant};

use proptest::prelude::*;
use proptest::strategy::Strategy as _;

use super::*;
use super::Strategy;
use crate::context::Context;
use crate::error::Error;

fn map(pairs: &[(&str, u64)]) -> CountMap {
    pairs.iter().map(|&(w, c)| (w.to_string(), c)).collect()
}

fn sorted(counts: &CountMap) -> BTreeMap<String, u64> {
    counts.iter().map(|(w, c)| (w.clone(), *c)).collect()
}

fn seq(input: &[u8]) -> CountMap {
    count_sequential(&Context::new(), input).unwrap()
}

fn sharded(input: &[u8], workers: usize, batch_size: usize) -> CountMap {
    let config = ShardConfig::new(workers).with_batch_size(batch_size);
    count_sharded(&Context::new(), input, &config).unwrap()
}

fn buffered(input: &[u8]) -> CountMap {
    let mut data = input.to_vec();
    count_bytes(&Context::new(), &mut data).unwrap()
}

/// Yields `data`, then fails instead of reporting end-of-stream.
struct FailingReader {
    data: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::other("disk on fire")),
            n => Ok(n),
        }
    }
}

/// Cancels `ctx` once `after` reads have been served.
struct CancellingReader {
    data: Cursor<Vec<u8>>,
    ctx: Context,
    after: usize,
    reads: usize,
}

impl Read for CancellingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        if self.reads == self.after {
            self.ctx.cancel();
        }
        self.data.read(buf)
    }
}

/// `words` tokens drawn round-robin from a vocabulary of `vocab` mixed-case words.
fn synthetic(words: usize, vocab: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(words * 8);
    for i in 0..words {
        let w = (i * 7919) % vocab;
        if w % 3 == 0 {
            out.extend_from_slice(format!("Word{w}").as_bytes());
        } else {
            out.extend_from_slice(format!("word{w}").as_bytes());
        }
        out.push(match i % 5 {
            0 => b'\n',
            1 => b'\t',
            _ => b' ',
        });
    }
    out
}

// ──────────────────────────────────────────────────
// Normalization
// ──────────────────────────────────────────────────

#[test]
fn test_normalize_ascii_folds_in_place() {
    let mut raw = b"HeLLo".to_vec();
    assert_eq!(normalize(&mut raw), Normalized::Ascii("hello"));
    assert_eq!(raw, b"hello");
}

#[test]
fn test_normalize_ascii_keeps_punctuation() {
    let mut raw = b"Don't-STOP!".to_vec();
    assert_eq!(normalize(&mut raw), Normalized::Ascii("don't-stop!"));
}

#[test]
fn test_normalize_strips_bom_prefix() {
    let mut raw = b"\xEF\xBB\xBFApple".to_vec();
    assert_eq!(normalize(&mut raw), Normalized::Ascii("apple"));
}

#[test]
fn test_normalize_bom_only_is_empty() {
    let mut raw = BOM.to_vec();
    assert_eq!(normalize(&mut raw), Normalized::Empty);
    let mut double = [BOM, BOM].concat();
    assert_eq!(normalize(&mut double), Normalized::Empty);
}

#[test]
fn test_normalize_bom_not_at_start_is_kept() {
    let mut raw = "a\u{feff}".as_bytes().to_vec();
    assert_eq!(
        normalize(&mut raw),
        Normalized::Unicode("a\u{feff}".to_string())
    );
}

#[test]
fn test_normalize_unicode_lowercases() {
    let mut raw = "ÉCOLE".as_bytes().to_vec();
    assert_eq!(normalize(&mut raw), Normalized::Unicode("école".to_string()));
    let mut greek = "ΣΟΦΙΑ".as_bytes().to_vec();
    assert_eq!(normalize(&mut greek).as_str(), Some("σοφια"));
}

#[test]
fn test_normalize_invalid_utf8_is_replaced() {
    let mut raw = b"AB\xFFc".to_vec();
    assert_eq!(
        normalize(&mut raw),
        Normalized::Unicode("ab\u{fffd}c".to_string())
    );
}

#[test]
fn test_normalize_word_helper() {
    assert_eq!(normalize_word("MiXeD"), Some("mixed".to_string()));
    assert_eq!(normalize_word("\u{feff}"), None);
}

#[test]
fn test_is_space_set() {
    for b in [b' ', b'\t', b'\n', b'\r', 0x0B, 0x0C] {
        assert!(is_space(b), "{b:#x} should separate words");
    }
    for b in [0u8, b'a', 0x85, 0xA0, b'_'] {
        assert!(!is_space(b), "{b:#x} should be word content");
    }
}

#[test]
fn test_fnv1a_known_values() {
    assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
    assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
    assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
}

// ──────────────────────────────────────────────────
// Tokenizer
// ──────────────────────────────────────────────────

#[test]
fn test_tokenizer_basic() {
    let words = read_words(&b"aa bb aa"[..]).unwrap();
    assert_eq!(words, vec!["aa", "bb", "aa"]);
}

#[test]
fn test_tokenizer_all_separators() {
    let words = read_words(&b"  one\ttwo\nthree\r\nfour\x0Bfive\x0Csix  "[..]).unwrap();
    assert_eq!(words, vec!["one", "two", "three", "four", "five", "six"]);
}

#[test]
fn test_tokenizer_empty_and_blank() {
    assert!(read_words(&b""[..]).unwrap().is_empty());
    assert!(read_words(&b" \t\n\r\x0B\x0C"[..]).unwrap().is_empty());
}

#[test]
fn test_tokenizer_nul_is_word_content() {
    let words = read_words(&b"a\x00b c"[..]).unwrap();
    assert_eq!(words, vec!["a\0b", "c"]);
}

#[test]
fn test_tokenizer_word_spanning_buffer_refills() {
    let input = "Alpha  BETA\tgamma\u{00c9}x delta".as_bytes();
    for capacity in [1, 2, 3, 7] {
        let reader = BufReader::with_capacity(capacity, input);
        let words = read_words(reader).unwrap();
        assert_eq!(
            words,
            vec!["alpha", "beta", "gamma\u{e9}x", "delta"],
            "capacity {capacity}"
        );
    }
}

#[test]
fn test_tokenizer_skips_bom_only_token() {
    let input = "\u{feff} a \u{feff}".as_bytes();
    assert_eq!(read_words(input).unwrap(), vec!["a"]);
}

#[test]
fn test_tokenizer_resumes_from_cursor() {
    let mut tokens = Tokenizer::new(&b"first second third"[..]);
    assert_eq!(tokens.next_word().unwrap().as_deref(), Some("first"));
    let rest: Vec<String> = tokens.map(Result::unwrap).collect();
    assert_eq!(rest, vec!["second", "third"]);
}

#[test]
fn test_tokenizer_into_inner_leaves_rest_unread() {
    let mut tokens = Tokenizer::new(&b"first  second third"[..]);
    assert_eq!(tokens.next_word().unwrap().as_deref(), Some("first"));
    // only the delimiter right after the word is consumed
    let rest: &[u8] = tokens.into_inner();
    assert_eq!(rest, b" second third");
    assert_eq!(read_words(rest).unwrap(), vec!["second", "third"]);
}

#[test]
fn test_tokenizer_next_token_borrows() {
    let mut tokens = Tokenizer::new(&b"ABC"[..]);
    assert_eq!(tokens.next_token().unwrap(), Some(Normalized::Ascii("abc")));
    assert_eq!(tokens.next_token().unwrap(), None);
    // exhausted stays exhausted
    assert_eq!(tokens.next_word().unwrap(), None);
}

#[test]
fn test_tokenizer_read_error_surfaces() {
    let reader = BufReader::new(FailingReader {
        data: Cursor::new(b"a b partial".to_vec()),
    });
    let mut tokens = Tokenizer::new(reader);
    assert_eq!(tokens.next_word().unwrap().as_deref(), Some("a"));
    assert_eq!(tokens.next_word().unwrap().as_deref(), Some("b"));
    match tokens.next_word() {
        Err(Error::Read { stage, source }) => {
            assert_eq!(stage, "read word");
            assert_eq!(source.to_string(), "disk on fire");
        }
        other => panic!("expected read error, got {other:?}"),
    }
}

// ──────────────────────────────────────────────────
// Sequential counter
// ──────────────────────────────────────────────────

#[test]
fn test_sequential_scenario() {
    assert_eq!(seq(b"b a a b c"), map(&[("a", 2), ("b", 2), ("c", 1)]));
}

#[test]
fn test_sequential_case_folds() {
    assert_eq!(seq(b"The the THE tHe"), map(&[("the", 4)]));
}

#[test]
fn test_sequential_bom_stripped() {
    assert_eq!(
        seq("\u{feff}a a b".as_bytes()),
        map(&[("a", 2), ("b", 1)])
    );
}

#[test]
fn test_sequential_empty_input() {
    assert!(seq(b"").is_empty());
}

#[test]
fn test_sequential_cancelled_before_start() {
    let ctx = Context::new();
    ctx.cancel();
    let err = count_sequential(&ctx, &b"a a b"[..]).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_sequential_deadline_before_start() {
    let ctx = Context::new().with_deadline(Instant::now() - Duration::from_millis(1));
    let err = count_sequential(&ctx, &b"a"[..]).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[test]
fn test_sequential_cancelled_mid_stream() {
    let ctx = Context::new();
    let reader = BufReader::with_capacity(
        64,
        CancellingReader {
            data: Cursor::new(synthetic(CANCEL_CHECK_INTERVAL * 3, 50)),
            ctx: ctx.clone(),
            after: 2,
            reads: 0,
        },
    );
    let err = count_sequential(&ctx, reader).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_sequential_read_error_returns_no_map() {
    let reader = BufReader::new(FailingReader {
        data: Cursor::new(b"a b c".to_vec()),
    });
    let err = count_sequential(&Context::new(), reader).unwrap_err();
    assert!(matches!(err, Error::Read { .. }));
}

#[test]
fn test_count_words_normalizes() {
    let counts = count_words(&["Go", "go", "\u{feff}GO", "rust"]);
    assert_eq!(counts, map(&[("go", 3), ("rust", 1)]));
}

// ──────────────────────────────────────────────────
// Sharded counter
// ──────────────────────────────────────────────────

#[test]
fn test_sharded_scenario() {
    assert_eq!(
        sharded(b"b a a b c", 4, 1),
        map(&[("a", 2), ("b", 2), ("c", 1)])
    );
}

#[test]
fn test_sharded_bom_stripped() {
    assert_eq!(
        sharded("\u{feff}a a b".as_bytes(), 3, 2),
        map(&[("a", 2), ("b", 1)])
    );
}

#[test]
fn test_sharded_empty_input() {
    assert!(sharded(b"", 4, 16).is_empty());
    assert!(sharded(b"   \n", 4, 16).is_empty());
}

#[test]
fn test_sharded_single_worker_falls_back() {
    assert_eq!(sharded(b"x y x", 1, 8), map(&[("x", 2), ("y", 1)]));
    assert_eq!(sharded(b"x y x", 0, 8), map(&[("x", 2), ("y", 1)]));
}

#[test]
fn test_sharded_zero_batch_size_defaults() {
    let config = ShardConfig::new(3).with_batch_size(0);
    assert_eq!(config.effective_batch_size(), DEFAULT_BATCH_SIZE);
    let counts = count_sharded(&Context::new(), &b"q q r"[..], &config).unwrap();
    assert_eq!(counts, map(&[("q", 2), ("r", 1)]));
}

#[test]
fn test_sharded_zero_queue_depth_rejected() {
    let config = ShardConfig::new(2).with_queue_depth(0);
    let err = count_sharded(&Context::new(), &b"a"[..], &config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_sharded_queue_depth_one_backpressure() {
    let input = synthetic(50_000, 300);
    let config = ShardConfig::new(4).with_batch_size(1).with_queue_depth(1);
    let counts = count_sharded(&Context::new(), &input[..], &config).unwrap();
    assert_eq!(counts, seq(&input));
}

#[test]
fn test_sharded_cancelled_before_start() {
    let ctx = Context::new();
    ctx.cancel();
    let err = count_sharded(&ctx, &b"a a b"[..], &ShardConfig::new(4)).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_sharded_deadline_before_start() {
    let ctx = Context::new().with_timeout(Duration::ZERO);
    let err = count_sharded(&ctx, &b"a"[..], &ShardConfig::new(2)).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[test]
fn test_sharded_cancelled_mid_stream() {
    let ctx = Context::new();
    let reader = BufReader::with_capacity(
        64,
        CancellingReader {
            data: Cursor::new(synthetic(100_000, 50)),
            ctx: ctx.clone(),
            after: 10,
            reads: 0,
        },
    );
    let config = ShardConfig::new(4).with_batch_size(8);
    let err = count_sharded(&ctx, reader, &config).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

/// One shard, one-batch queue, huge batches: the driver fills the next
/// batch long before the worker drains the current one and blocks handing
/// it off.
fn stalled_hand_off_input() -> (Vec<u8>, ShardConfig) {
    let config = ShardConfig::new(2)
        .with_batch_size(1_000_000)
        .with_queue_depth(1);
    (b"same ".repeat(6_000_000), config)
}

#[test]
fn test_sharded_cancel_wakes_blocked_hand_off() {
    let (input, config) = stalled_hand_off_input();
    let ctx = Context::new();
    let canceller = {
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            ctx.cancel();
        })
    };
    let started = Instant::now();
    let err = count_sharded(&ctx, &input[..], &config).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, Error::Canceled), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_sharded_deadline_wakes_blocked_hand_off() {
    let (input, config) = stalled_hand_off_input();
    let ctx = Context::new().with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = count_sharded(&ctx, &input[..], &config).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_sharded_read_error_returns_no_map() {
    let reader = BufReader::new(FailingReader {
        data: Cursor::new(synthetic(5_000, 20)),
    });
    let err = count_sharded(&Context::new(), reader, &ShardConfig::new(4)).unwrap_err();
    match err {
        Error::Read { stage, .. } => assert_eq!(stage, "read word"),
        other => panic!("expected read error, got {other:?}"),
    }
}

#[test]
fn test_sharded_many_workers_few_words() {
    // more shards than distinct words leaves some shards empty
    assert_eq!(sharded(b"only once", 16, 4), map(&[("only", 1), ("once", 1)]));
}

#[test]
fn test_merge_sums_overlapping_keys() {
    let merged = super::sharded::merge(vec![
        map(&[("a", 1), ("b", 2)]),
        map(&[("a", 3)]),
        CountMap::new(),
        map(&[("c", 5), ("b", 1), ("d", 1)]),
    ]);
    assert_eq!(merged, map(&[("a", 4), ("b", 3), ("c", 5), ("d", 1)]));
    assert!(super::sharded::merge(Vec::new()).is_empty());
}

// ──────────────────────────────────────────────────
// Buffered counter
// ──────────────────────────────────────────────────

#[test]
fn test_buffered_scenario() {
    assert_eq!(buffered(b"b a a b c"), map(&[("a", 2), ("b", 2), ("c", 1)]));
}

#[test]
fn test_buffered_folds_buffer_in_place() {
    let mut data = b"HELLO World".to_vec();
    let counts = count_bytes(&Context::new(), &mut data).unwrap();
    assert_eq!(counts, map(&[("hello", 1), ("world", 1)]));
    assert_eq!(data, b"hello world");
}

#[test]
fn test_buffered_keys_do_not_alias_buffer() {
    let mut data = b"KEY key".to_vec();
    let counts = count_bytes(&Context::new(), &mut data).unwrap();
    data.fill(b'#');
    assert_eq!(counts, map(&[("key", 2)]));
}

#[test]
fn test_buffered_bom_handling() {
    assert_eq!(buffered("\u{feff}a a b".as_bytes()), map(&[("a", 2), ("b", 1)]));
    assert_eq!(buffered("\u{feff} z".as_bytes()), map(&[("z", 1)]));
}

#[test]
fn test_buffered_unicode_path() {
    assert_eq!(
        buffered("Straße STRASSE straße".as_bytes()),
        map(&[("straße", 2), ("strasse", 1)])
    );
}

#[test]
fn test_buffered_reader_variant() {
    let counts = count_reader_buffered(&Context::new(), &b"x X y"[..]).unwrap();
    assert_eq!(counts, map(&[("x", 2), ("y", 1)]));
}

#[test]
fn test_buffered_cancelled_before_start() {
    let ctx = Context::new();
    ctx.cancel();
    assert!(matches!(
        count_reader_buffered(&ctx, &b"a"[..]).unwrap_err(),
        Error::Canceled
    ));
    let mut data = b"a".to_vec();
    assert!(matches!(
        count_bytes(&ctx, &mut data).unwrap_err(),
        Error::Canceled
    ));
}

#[test]
fn test_buffered_cancelled_during_read() {
    let ctx = Context::new();
    let reader = CancellingReader {
        data: Cursor::new(synthetic(10_000, 10)),
        ctx: ctx.clone(),
        after: 1,
        reads: 0,
    };
    // first read is served, the second is refused by the context check
    let err = count_reader_buffered(&ctx, reader).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_buffered_read_error() {
    let reader = FailingReader {
        data: Cursor::new(b"a b".to_vec()),
    };
    match count_reader_buffered(&Context::new(), reader).unwrap_err() {
        Error::Read { stage, .. } => assert_eq!(stage, "read all"),
        other => panic!("expected read error, got {other:?}"),
    }
}

// ──────────────────────────────────────────────────
// Strategy equivalence
// ──────────────────────────────────────────────────

#[test]
fn test_strategy_dispatch_agrees() {
    let input = synthetic(20_000, 123);
    let ctx = Context::new();
    let expected = count(&ctx, &input[..], &Strategy::Sequential).unwrap();
    let strategies = [
        Strategy::Buffered,
        Strategy::Sharded(ShardConfig::new(3).with_batch_size(7)),
        Strategy::Sharded(ShardConfig::new(1)),
    ];
    for strategy in strategies {
        assert_eq!(count(&ctx, &input[..], &strategy).unwrap(), expected);
    }
}

#[test]
fn test_large_input_identical_across_worker_counts() {
    let input = synthetic(400_000, 2_000);
    let reference = sorted(&seq(&input));
    assert_eq!(reference.len(), 2_000);
    assert_eq!(reference.values().sum::<u64>(), 400_000);
    for workers in [1, 2, 4, 8] {
        let got = sorted(&sharded(&input, workers, DEFAULT_BATCH_SIZE));
        assert_eq!(got, reference, "workers = {workers}");
    }
    assert_eq!(sorted(&buffered(&input)), reference);
}

fn word_strategy() -> impl proptest::strategy::Strategy<Value = String> {
    prop_oneof![
        "[a-cA-C]{1,3}",
        Just("\u{feff}".to_string()),
        Just("\u{feff}Ab".to_string()),
        Just("ÉTÉ".to_string()),
        Just("été".to_string()),
        Just("x\u{0}y".to_string()),
    ]
}

fn separator_strategy() -> impl proptest::strategy::Strategy<Value = &'static str> {
    prop_oneof![
        Just(" "),
        Just("  "),
        Just("\t"),
        Just("\n"),
        Just("\r\n"),
        Just("\x0B\x0C"),
    ]
}

fn text_strategy() -> impl proptest::strategy::Strategy<Value = Vec<u8>> {
    prop::collection::vec((word_strategy(), separator_strategy()), 0..60).prop_map(|parts| {
        let mut out = Vec::new();
        for (word, sep) in parts {
            out.extend_from_slice(word.as_bytes());
            out.extend_from_slice(sep.as_bytes());
        }
        out
    })
}

proptest! {
    #[test]
    fn prop_all_strategies_agree(
        input in text_strategy(),
        workers in 2usize..6,
        batch_size in 1usize..8,
    ) {
        let expected = seq(&input);
        prop_assert_eq!(&buffered(&input), &expected);
        prop_assert_eq!(&sharded(&input, workers, batch_size), &expected);
    }

    #[test]
    fn prop_partitioning_does_not_matter(
        input in text_strategy(),
        a in (2usize..8, 1usize..16),
        b in (2usize..8, 1usize..16),
    ) {
        prop_assert_eq!(sharded(&input, a.0, a.1), sharded(&input, b.0, b.1));
    }

    #[test]
    fn prop_normalize_idempotent(word in "[a-zA-Z0-9éÉßÄäΣσ!?.'-]{1,16}") {
        let once = normalize_word(&word).unwrap();
        prop_assert_eq!(normalize_word(&once), Some(once.clone()));
    }

    #[test]
    fn prop_total_matches_token_count(input in text_strategy()) {
        let words = read_words(&input[..]).unwrap();
        let total: u64 = seq(&input).values().sum();
        prop_assert_eq!(total, words.len() as u64);
    }
}
