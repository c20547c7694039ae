//! Property tests for the structure-data parser

use chemsync_ingest::ingest::sdf::{ParserOptions, RecordPolicy, STRUCTURE_END};
use chemsync_ingest::IngestError;
use proptest::prelude::*;
use std::io::Cursor;

fn structure_line() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 .+-]{0,30}"
}

fn molfile() -> impl Strategy<Value = String> {
    prop::collection::vec(structure_line(), 0..8).prop_map(|lines| {
        lines.into_iter().map(|line| format!("{}\n", line)).collect()
    })
}

/// Connection table sized by its counts line, with the leading blank line the
/// structured policy prepends
fn counted_molfile() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(structure_line(), 3),
        prop::collection::vec(structure_line(), 0..6),
        prop::collection::vec(structure_line(), 0..6),
        prop::collection::vec("[a-z][a-z0-9 ]{0,20}", 0..3),
    )
        .prop_map(|(header, atoms, bonds, properties)| {
            let mut lines = header;
            lines.push(counts_line(atoms.len(), bonds.len()));
            lines.extend(atoms);
            lines.extend(bonds);
            lines.extend(properties);
            lines.push(STRUCTURE_END.to_string());
            let body: String = lines.into_iter().map(|line| format!("{}\n", line)).collect();
            format!("\n{}", body)
        })
}

fn counts_line(atoms: usize, bonds: usize) -> String {
    format!("{:>3}{:>3}  0  0  0  0  0  0  0  0999 V2000", atoms, bonds)
}

fn try_parse(options: &ParserOptions, text: &str) -> chemsync_ingest::Result<Vec<(Option<i32>, String)>> {
    options
        .records(Cursor::new(text.as_bytes().to_vec()), "generated.sdf")
        .map(|record| record.map(|r| (r.id, r.molfile)))
        .collect()
}

fn parse(options: &ParserOptions, text: &str) -> Vec<(Option<i32>, String)> {
    options
        .records(Cursor::new(text.as_bytes().to_vec()), "generated.sdf")
        .map(|record| record.map(|r| (r.id, r.molfile)))
        .collect::<chemsync_ingest::Result<Vec<_>>>()
        .unwrap_or_default()
}

proptest! {
    #[test]
    fn rendered_records_parse_back(
        records in prop::collection::vec((0..i32::MAX, molfile()), 1..6),
        prefix in prop::sample::select(vec!["", "DB", "CHEMBL"]),
    ) {
        let options = ParserOptions::new("ID")
            .with_policy(RecordPolicy::Scanning)
            .with_prefix(prefix);
        let text: String = records
            .iter()
            .map(|(id, molfile)| options.render(*id, molfile))
            .collect();

        let parsed = parse(&options, &text);
        let expected: Vec<(Option<i32>, String)> = records
            .into_iter()
            .map(|(id, molfile)| (Some(id), molfile))
            .collect();
        prop_assert_eq!(parsed, expected);
    }

    #[test]
    fn trailing_blank_lines_do_not_add_records(
        id in 0..i32::MAX,
        molfile in molfile(),
        blanks in 0usize..4,
    ) {
        let options = ParserOptions::new("ID");
        let text = format!("{}{}", options.render(id, &molfile), "\n".repeat(blanks));

        prop_assert_eq!(parse(&options, &text), vec![(Some(id), molfile)]);
    }

    #[test]
    fn counted_records_parse_back(
        records in prop::collection::vec((0..i32::MAX, counted_molfile()), 1..5),
        prefix in prop::sample::select(vec!["", "DB"]),
    ) {
        let options = ParserOptions::new("DATABASE_ID")
            .with_policy(RecordPolicy::Structured)
            .with_prefix(prefix);
        let text: String = records
            .iter()
            .map(|(id, molfile)| options.render(*id, molfile))
            .collect();

        let expected: Vec<(Option<i32>, String)> = records
            .into_iter()
            .map(|(id, molfile)| (Some(id), molfile))
            .collect();
        prop_assert_eq!(try_parse(&options, &text).unwrap(), expected);
    }

    #[test]
    fn counts_beyond_input_are_malformed(
        header in prop::collection::vec(structure_line(), 3),
        atoms in 0usize..6,
        bonds in 0usize..6,
        missing in 1usize..4,
    ) {
        prop_assume!(atoms + bonds >= missing);
        let present = atoms + bonds - missing;

        let mut lines = header;
        lines.push(counts_line(atoms, bonds));
        lines.extend((0..present).map(|i| format!("line {}", i)));
        let text: String = lines.into_iter().map(|line| format!("{}\n", line)).collect();

        let options = ParserOptions::new("ID").with_policy(RecordPolicy::Structured);
        let err = try_parse(&options, &text).unwrap_err();
        prop_assert!(matches!(err, IngestError::MalformedRecord { .. }), "unexpected error: {}", err);
    }
}
