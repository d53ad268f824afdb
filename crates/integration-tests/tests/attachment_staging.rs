//! Property tests for the attachment staging buffer.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;

use deskline_client::attachments::{
    ACCEPTED_TYPES, AttachmentSource, AttachmentStagingBuffer, MAX_FILE_SIZE, MAX_FILES,
    RejectionReason, StagedAttachment,
};
use proptest::prelude::*;

fn candidate(name: &str, byte_size: u64, mime_type: &str, last_modified: i64) -> StagedAttachment {
    StagedAttachment {
        name: name.to_string(),
        byte_size,
        mime_type: mime_type.to_string(),
        last_modified,
        source: AttachmentSource::Memory(Arc::from(Vec::new())),
    }
}

fn png(name: &str) -> StagedAttachment {
    candidate(name, 2048, "image/png", 1_700_000_000_000)
}

#[derive(Debug, Clone)]
enum Op {
    Add(Vec<StagedAttachment>),
    Remove(usize),
    Clear,
}

fn arb_candidate() -> impl Strategy<Value = StagedAttachment> {
    // A small name and time pool so duplicates show up often
    (
        prop::sample::select(vec!["a.png", "b.jpg", "c.pdf", "d.png", "notes.txt"]),
        prop_oneof![
            Just(0_u64),
            1_u64..=MAX_FILE_SIZE,
            Just(MAX_FILE_SIZE + 1),
        ],
        prop::sample::select(vec![
            "image/png",
            "image/jpeg",
            "application/pdf",
            "image/gif",
            "text/plain",
        ]),
        0_i64..3,
    )
        .prop_map(|(name, size, mime, modified)| candidate(name, size, mime, modified))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => prop::collection::vec(arb_candidate(), 0..6).prop_map(Op::Add),
        2 => (0_usize..4).prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    #[test]
    fn staged_set_stays_within_bounds(ops in prop::collection::vec(arb_op(), 1..20)) {
        let mut buffer = AttachmentStagingBuffer::new();

        for op in ops {
            match op {
                Op::Add(candidates) => {
                    let offered = candidates.len();
                    let before = buffer.len();
                    let outcome = buffer.add(candidates);
                    prop_assert_eq!(outcome.accepted.len() + outcome.rejected.len(), offered);
                    prop_assert_eq!(buffer.len(), before + outcome.accepted.len());
                }
                Op::Remove(index) => {
                    if let Some(key) = buffer.staged().get(index).map(StagedAttachment::key) {
                        prop_assert!(buffer.remove(&key).is_some());
                        prop_assert!(buffer.remove(&key).is_none());
                    }
                }
                Op::Clear => buffer.clear(),
            }

            prop_assert!(buffer.len() <= MAX_FILES);
            prop_assert_eq!(buffer.remaining_slots(), MAX_FILES - buffer.len());

            let keys: HashSet<_> = buffer.staged().iter().map(StagedAttachment::key).collect();
            prop_assert_eq!(keys.len(), buffer.len());

            for attachment in buffer.staged() {
                prop_assert!(attachment.byte_size <= MAX_FILE_SIZE);
                prop_assert!(ACCEPTED_TYPES.contains(&attachment.mime_type.as_str()));
            }
        }
    }

    #[test]
    fn accepted_candidates_keep_input_order(candidates in prop::collection::vec(arb_candidate(), 0..8)) {
        let mut buffer = AttachmentStagingBuffer::new();
        let names: Vec<String> = candidates.iter().map(|c| c.name.clone()).collect();
        let outcome = buffer.add(candidates);

        let accepted: Vec<&str> = outcome.accepted.iter().map(|a| a.name.as_str()).collect();
        let mut cursor = names.iter();
        for name in &accepted {
            prop_assert!(cursor.any(|n| n == name));
        }
        let staged: Vec<&str> = buffer.staged().iter().map(|a| a.name.as_str()).collect();
        prop_assert_eq!(staged, accepted);
    }
}

#[test]
fn test_limit_applies_in_input_order() {
    let mut buffer = AttachmentStagingBuffer::new();
    buffer.add([png("one.png"), png("two.png")]);

    let outcome = buffer.add([png("three.png"), png("four.png"), png("five.png")]);

    let accepted: Vec<_> = outcome.accepted.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(accepted, ["three.png"]);

    let rejected: Vec<_> = outcome
        .rejected
        .iter()
        .map(|r| (r.attachment.name.as_str(), r.reason))
        .collect();
    assert_eq!(
        rejected,
        [
            ("four.png", RejectionReason::LimitReached),
            ("five.png", RejectionReason::LimitReached),
        ]
    );
    assert_eq!(outcome.messages(), ["Only 1 more file allowed"]);
    assert_eq!(buffer.len(), MAX_FILES);
}

#[test]
fn test_same_file_twice_in_one_call() {
    let mut buffer = AttachmentStagingBuffer::new();

    let outcome = buffer.add([png("scan.png"), png("scan.png")]);

    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(
        outcome.rejected.first().unwrap().reason,
        RejectionReason::Duplicate
    );
    assert_eq!(outcome.messages(), ["scan.png already added"]);
    assert_eq!(buffer.len(), 1);
}

#[test]
fn test_same_name_different_size_is_distinct() {
    let mut buffer = AttachmentStagingBuffer::new();

    let outcome = buffer.add([
        candidate("scan.png", 100, "image/png", 5),
        candidate("scan.png", 200, "image/png", 5),
    ]);

    assert_eq!(outcome.accepted.len(), 2);
    assert!(outcome.rejected.is_empty());
}

#[test]
fn test_full_buffer_reports_limit() {
    let mut buffer = AttachmentStagingBuffer::new();
    buffer.add([png("a.png"), png("b.png"), png("c.png")]);

    let outcome = buffer.add([png("d.png"), png("e.png")]);

    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.messages(), ["Limit is 3 files"]);
}

#[test]
fn test_removed_file_can_be_staged_again() {
    let mut buffer = AttachmentStagingBuffer::new();
    buffer.add([png("a.png")]);

    let key = png("a.png").key();
    assert!(buffer.remove(&key).is_some());
    let outcome = buffer.add([png("a.png")]);

    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(buffer.len(), 1);
}
