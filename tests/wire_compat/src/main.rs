fn main() {
    println!("Run `cargo test -p wire-compat` to execute completion log compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use partsync_protocol::{PartitionBitmask, UploadNodeRecord};
    use partsync_transfer::{DEFAULT_PARTITION_SIZE, FileNode, UploadCompletionTable};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture file as text.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses every non-empty line of a log fixture.
    fn load_records(name: &str) -> Vec<UploadNodeRecord> {
        load_fixture(name)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                UploadNodeRecord::from_line(line)
                    .unwrap_or_else(|e| panic!("failed to parse {name} line {}: {e}", i + 1))
            })
            .collect()
    }

    /// Re-encodes a record and checks that nothing is lost on the way back.
    fn roundtrip(record: &UploadNodeRecord) {
        let line = record
            .to_line()
            .unwrap_or_else(|e| panic!("failed to encode {}: {e}", record.file_path.display()));
        let back = UploadNodeRecord::from_line(&line)
            .unwrap_or_else(|e| panic!("failed to decode {line}: {e}"));
        assert_eq!(&back, record, "roundtrip mismatch:\n  line: {line}");
    }

    // --- Log line format ---

    #[test]
    fn fixture_canonical_record_is_byte_stable() {
        let fixture = load_fixture("upload_node_record.json");
        let expected = fixture.trim_end();
        let record = UploadNodeRecord::from_line(expected).unwrap();

        assert_eq!(record.bitmask, PartitionBitmask::all_set(3).clear_bit(1));
        assert_eq!(record.partition_size, Some(DEFAULT_PARTITION_SIZE));
        assert_eq!(record.to_line().unwrap(), expected);
    }

    #[test]
    fn fixture_legacy_log_parses() {
        let records = load_records("legacy_upload_log.jsonl");
        assert_eq!(records.len(), 4);

        let first = &records[0];
        assert_eq!(first.size, 1_200_000_000);
        assert_eq!(first.ftime, 1_718_000_000.25);
        assert_eq!(first.bitmask, PartitionBitmask::all_set(3));
        assert!(first.upload_id.is_empty());
        assert!(!first.complete);
        assert_eq!(first.file_path, Path::new("/data/a.bin"));
        assert_eq!(first.partition_size, None);

        let last = &records[3];
        assert!(last.complete);
        assert!(last.bitmask.is_zero());
        assert_eq!(last.hash.len(), 64);

        for record in &records {
            roundtrip(record);
        }
    }

    #[test]
    fn fixture_legacy_wide_bitmask_is_exact() {
        let records = load_records("legacy_upload_log.jsonl");
        let huge = &records[1];

        // 70 partitions with 3 and 69 done.
        assert_eq!(huge.bitmask.to_string(), "590295810358705651703");
        assert_eq!(huge.bitmask.bit_len(), 69);
        assert_eq!(huge.bitmask.count_set(), 68);
        assert!(!huge.bitmask.is_bit_set(3));
        assert!(!huge.bitmask.is_bit_set(69));
        assert!(huge.bitmask.is_bit_set(68));

        let line = huge.to_line().unwrap();
        assert!(line.contains("\"bitmask\":590295810358705651703,"));
    }

    // --- Replay ---

    #[tokio::test]
    async fn fixture_legacy_log_replays_latest_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("table.log");
        fs::copy(fixtures_dir().join("legacy_upload_log.jsonl"), &log).unwrap();

        let table = UploadCompletionTable::new(Some(log), DEFAULT_PARTITION_SIZE);
        assert_eq!(table.load_table().await.unwrap(), 2);

        let a = table.get_file_node(Path::new("/data/a.bin")).await.unwrap();
        assert!(a.is_complete().await);
        assert!(a.bitmask().await.is_zero());
        assert_eq!(a.upload_id().await.as_deref(), Some("mpu-11c2"));
        assert_eq!(a.identity().size, 1_200_000_000);

        let huge = table.get_file_node(Path::new("/data/huge.img")).await.unwrap();
        assert_eq!(huge.partition_count(), 70);
        assert_eq!(
            huge.get_completed_size().await,
            2 * DEFAULT_PARTITION_SIZE
        );

        // Neither file exists here, so both count as nothing done.
        assert_eq!(
            table
                .calculate_checked_file_completion(Path::new("/data/a.bin"))
                .await,
            (0, 0)
        );
    }

    #[tokio::test]
    async fn appended_lines_extend_legacy_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("table.log");
        fs::copy(fixtures_dir().join("legacy_upload_log.jsonl"), &log).unwrap();

        let table = UploadCompletionTable::new(Some(log.clone()), DEFAULT_PARTITION_SIZE)
            .with_sync_on_flush(false);
        table.load_table().await.unwrap();
        let huge = table.get_file_node(Path::new("/data/huge.img")).await.unwrap();
        huge.set_partition_complete(0).await;
        assert_eq!(table.save_all_file_nodes().await.unwrap(), 1);

        let content = fs::read_to_string(&log).unwrap();
        assert_eq!(content.lines().count(), 5);
        let appended = UploadNodeRecord::from_line(content.lines().last().unwrap()).unwrap();
        assert_eq!(appended.file_path, Path::new("/data/huge.img"));
        assert_eq!(appended.bitmask.count_set(), 67);
        assert_eq!(appended.partition_size, Some(DEFAULT_PARTITION_SIZE));
    }
}
