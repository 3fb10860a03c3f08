use prewarm_serdes::{HandleKind, TaggedReader, TaggedWriter};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Item {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    Index(u64),
    Str(String),
    Handle(bool, Option<u64>),
    Entry(String, Vec<Item>),
}

fn item_strategy() -> impl Strategy<Value = Item> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Item::Bool),
        any::<i32>().prop_map(Item::I32),
        any::<i64>().prop_map(Item::I64),
        any::<u32>().prop_map(Item::U32),
        any::<u64>().prop_map(Item::U64),
        (0u64..u64::MAX).prop_map(Item::Index),
        ".{0,12}".prop_map(Item::Str),
        (any::<bool>(), proptest::option::of(0u64..1_000_000))
            .prop_map(|(ctx, idx)| Item::Handle(ctx, idx)),
    ];
    leaf.prop_recursive(4, 64, 6, |inner| {
        ("[A-Za-z]{0,10}", prop::collection::vec(inner, 0..6))
            .prop_map(|(name, items)| Item::Entry(name, items))
    })
}

fn handle_kind(context_dependent: bool) -> HandleKind {
    if context_dependent {
        HandleKind::ContextDependent
    } else {
        HandleKind::ContextIndependent
    }
}

fn write_item(w: &mut TaggedWriter, item: &Item) {
    match item {
        Item::Bool(v) => w.write_bool(*v),
        Item::I32(v) => w.write_i32(*v),
        Item::I64(v) => w.write_i64(*v),
        Item::U32(v) => w.write_u32(*v),
        Item::U64(v) => w.write_u64(*v),
        Item::Index(v) => w.write_index(*v),
        Item::Str(v) => w.write_string(v),
        Item::Handle(ctx, idx) => w.write_handle(handle_kind(*ctx), *idx),
        Item::Entry(name, items) => {
            w.start_entry(name);
            for item in items {
                write_item(w, item);
            }
            w.end_entry();
        }
    }
}

/// Reads `item` back, returning `false` on any decode error or value mismatch.
fn read_item(r: &mut TaggedReader, item: &Item) -> bool {
    match item {
        Item::Bool(v) => r.read_bool().ok() == Some(*v),
        Item::I32(v) => r.read_i32().ok() == Some(*v),
        Item::I64(v) => r.read_i64().ok() == Some(*v),
        Item::U32(v) => r.read_u32().ok() == Some(*v),
        Item::U64(v) => r.read_u64().ok() == Some(*v),
        Item::Index(v) => r.read_index().ok() == Some(*v),
        Item::Str(v) => r.read_string().ok().as_ref() == Some(v),
        Item::Handle(ctx, idx) => r.read_handle(handle_kind(*ctx)).ok() == Some(*idx),
        Item::Entry(name, items) => {
            if r.start_read_entry(Some(name)).is_err() {
                return false;
            }
            items.iter().all(|item| read_item(r, item)) && r.end_read_entry().is_ok()
        }
    }
}

proptest! {
    #[test]
    fn values_round_trip(items in prop::collection::vec(item_strategy(), 0..8)) {
        let mut w = TaggedWriter::new();
        for item in &items {
            write_item(&mut w, item);
        }
        let bytes = w.into_checked_bytes().unwrap();

        let mut r = TaggedReader::new(bytes);
        for item in &items {
            prop_assert!(read_item(&mut r, item));
        }
        prop_assert!(r.errors().is_empty());
        prop_assert!(r.finish().is_ok());
    }

    #[test]
    fn corrupted_tag_is_reported(
        items in prop::collection::vec(item_strategy(), 1..8),
        pick in any::<prop::sample::Index>(),
        replacement in any::<u8>(),
    ) {
        let mut w = TaggedWriter::new();
        let mut tag_offsets = Vec::new();
        for item in &items {
            tag_offsets.push(w.len());
            write_item(&mut w, item);
        }
        let mut bytes = w.into_bytes();
        let offset = tag_offsets[pick.index(tag_offsets.len())];
        prop_assume!(bytes[offset] != replacement);
        bytes[offset] = replacement;

        let mut r = TaggedReader::new(bytes);
        let all_ok = items.iter().all(|item| read_item(&mut r, item));
        prop_assert!(!all_ok);
        prop_assert!(!r.errors().is_empty());
    }

    #[test]
    fn dump_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut r = TaggedReader::new(bytes);
        let report = r.dump();
        if !report.errors.is_empty() {
            prop_assert!(report.text.contains("errors found:"));
        }
        prop_assert_eq!(r.position(), 0);
        prop_assert!(r.errors().is_empty());
    }
}

#[test]
fn dump_of_valid_stream_lists_every_value() {
    let mut w = TaggedWriter::new();
    w.start_entry("Env");
    w.write_bool(true);
    w.write_i64(-9);
    w.write_handle(HandleKind::ContextDependent, None);
    w.end_entry();
    let mut r = TaggedReader::new(w.into_checked_bytes().unwrap());
    let report = r.dump();
    assert!(report.errors.is_empty());
    let lines: Vec<&str> = report.text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[1].ends_with("  Bool: true"));
    assert!(lines[2].ends_with("  Int64: -9"));
    assert!(lines[3].ends_with("  Object: (empty)"));
    assert!(lines[4].ends_with(" EndEntry"));
}
