#[cfg(test)]
pub mod tests {
    use std::process::Command;

    #[test]
    fn test_demo_output() {
        let output = Command::new("cargo")
            .args(["run", "--bin", "alloctrace-demo"])
            .output()
            .expect("Failed to execute command");

        assert!(
            output.status.success(),
            "Process did not exit successfully: {output:?}",
        );

        let expected = [
            "size_of::<Probe>() = 8",
            "split: raw heap object wrapped by a handle",
            "combined: control block and payload in one allocation",
            "allocator: combined allocation via LoggingAlloc",
            "alloc",
            "dealloc",
            "typed alloc",
            "typed dealloc",
            "Allocation summary",
            "Allocs",
            "Deallocs",
            "end",
        ];

        let stdout = String::from_utf8_lossy(&output.stdout);
        for expected in expected {
            assert!(
                stdout.contains(expected),
                "Output did not match expected.\nExpected:\n{expected}\n\nGot:\n{stdout}",
            );
        }
    }

    #[test]
    fn test_single_strategy_skips_other_paths() {
        let output = Command::new("cargo")
            .args([
                "run",
                "--bin",
                "alloctrace-demo",
                "--",
                "--strategy",
                "combined",
            ])
            .output()
            .expect("Failed to execute command");

        assert!(
            output.status.success(),
            "Process did not exit successfully: {output:?}",
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("combined: control block and payload in one allocation"));
        assert!(!stdout.contains("typed alloc"));
        assert!(!stdout.contains("split: raw heap object wrapped by a handle"));
    }

    #[test]
    fn test_json_output_is_balanced() {
        let output = Command::new("cargo")
            .args([
                "run",
                "--bin",
                "alloctrace-demo",
                "--",
                "--format",
                "json",
                "--quiet",
            ])
            .output()
            .expect("Failed to execute command");

        assert!(
            output.status.success(),
            "Process did not exit successfully: {output:?}",
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        let json_line = stdout
            .lines()
            .find(|line| line.starts_with('{'))
            .expect("no JSON summary in output");
        let summary: serde_json::Value =
            serde_json::from_str(json_line).expect("summary is not valid JSON");

        assert_eq!(summary["balanced"], true);
        assert_eq!(summary["live_blocks"], 0);
        assert_eq!(summary["anomalies"], 0);

        // Strategies 1 and 2: three heap allocations in total. Strategy 3:
        // exactly one typed allocation.
        assert_eq!(summary["paths"]["heap"]["allocs"], 3);
        assert_eq!(summary["paths"]["heap"]["deallocs"], 3);
        assert_eq!(summary["paths"]["typed"]["allocs"], 1);
        assert_eq!(summary["paths"]["typed"]["deallocs"], 1);
    }
}
