use proptest::prelude::*;
use sewerscan::export::{read_pileup_csv, PileupExportKind, PileupExporter, PileupFilterPolicy};
use sewerscan::genomics::{PileupRow, PileupTable, PositionCounts, Symbol, NUM_SYMBOLS};

fn ref_base() -> impl Strategy<Value = u8> {
    prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T'), Just(b'N')]
}

proptest! {
    #[test]
    fn frequencies_sum_to_one_hundred(
        tallies in proptest::array::uniform6(0u32..10_000),
        reference in ref_base(),
    ) {
        let counts = PositionCounts::from_counts(tallies);
        prop_assert_eq!(counts.total_depth(), tallies.iter().sum::<u32>());

        let row = PileupRow::derive(0, Some(counts), reference);
        match row.frequencies {
            Some(freqs) => {
                let total: f64 = freqs.as_array().iter().sum();
                prop_assert!((total - 100.0).abs() < 1e-9, "frequencies summed to {}", total);
                for symbol in Symbol::ALL {
                    prop_assert!((0.0..=100.0).contains(&freqs.get(symbol)));
                }
            }
            None => {
                prop_assert_eq!(counts.total_depth(), 0);
                prop_assert!(row.ref_frequency.is_none());
                prop_assert!(Symbol::ALL.iter().all(|&symbol| row.frequency(symbol).is_none()));
            }
        }
    }

    #[test]
    fn exported_tables_reingest_exactly(
        columns in proptest::collection::vec(
            (proptest::option::of(proptest::array::uniform6(0u32..500)), ref_base()),
            1..40,
        ),
        with_frequencies in any::<bool>(),
    ) {
        let rows: Vec<PileupRow> = columns
            .iter()
            .enumerate()
            .map(|(pos, (tallies, reference))| {
                PileupRow::derive(pos as u32, tallies.map(PositionCounts::from_counts), *reference)
            })
            .collect();
        let table = PileupTable::from_rows(rows);
        let exporter = PileupExporter::new(PileupFilterPolicy::default(), with_frequencies);

        let mut buffer = Vec::new();
        exporter.write(&mut buffer, &table, PileupExportKind::Full).unwrap();
        let reread = read_pileup_csv(buffer.as_slice()).unwrap();

        let written: Vec<&PileupRow> = exporter.select(&table, PileupExportKind::Full).collect();
        prop_assert_eq!(reread.len(), written.len());
        for (original, restored) in written.iter().zip(reread.rows()) {
            prop_assert_eq!(original.position, restored.position);
            prop_assert_eq!(original.counts, restored.counts);
            prop_assert_eq!(original.total_depth(), restored.total_depth());
            prop_assert_eq!(original.ref_base, restored.ref_base);
            prop_assert_eq!(original.ref_frequency, restored.ref_frequency);
        }
    }
}

#[test]
fn visited_rows_always_survive_the_non_null_rule() {
    let policy = PileupFilterPolicy::default();
    let zero = PileupRow::derive(0, Some(PositionCounts::new()), b'A');
    assert!(policy.has_enough_data(&zero, false));
    assert_eq!(zero.total_depth(), Some(0));
    assert_eq!([0u32; NUM_SYMBOLS], *PositionCounts::new().as_array());
}
