//! Parsers for the monitoring tools sampled around a job run.
//!
//! Three text formats: `perf stat` counter output, `vmstat` interval
//! tables, and `iostat -x` extended device tables. All parsers are pure
//! functions over the captured text. Malformed or partial input never
//! fails: a value that cannot be parsed is simply absent (or the row is
//! skipped), so a flaky monitoring tool can never fail the job itself.

use vmbench_protocol::{IostatDeviceSample, PerfMetrics, VmstatSample};

/// Sample window the monitors run for, in seconds (`vmstat 1 2`,
/// `iostat ... 1 2`). Used to turn per-second rates into window totals.
pub const SAMPLE_WINDOW_SECS: f64 = 2.0;

/// Parse `perf stat` counter output into [`PerfMetrics`].
///
/// perf writes one counter per line: a group-separated integer followed by
/// the event name, with blank and `#` comment lines interleaved. Lines
/// whose first token is not an integer (e.g. `<not supported>`) are
/// skipped. Event names are matched by substring, most specific first:
/// `cache-references` and `cache-misses` are checked before the generic
/// `cycles`, which would otherwise also match nothing but must not claim
/// unrelated counters.
pub fn parse_perf_output(output: &str) -> PerfMetrics {
    let mut metrics = PerfMetrics::default();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let Some(value_token) = tokens.next() else {
            continue;
        };

        // perf groups digits with ',' (or '.' in some locales)
        let cleaned: String = value_token
            .chars()
            .filter(|c| *c != ',' && *c != '.')
            .collect();
        let Ok(value) = cleaned.parse::<u64>() else {
            continue;
        };

        let event = tokens.collect::<Vec<_>>().join(" ").to_lowercase();
        if event.contains("cache-references") {
            metrics.cache_references = Some(value);
        } else if event.contains("cache-misses") {
            metrics.cache_misses = Some(value);
        } else if event.contains("branch-misses") {
            metrics.branch_misses = Some(value);
        } else if event.contains("instructions") {
            metrics.instructions = Some(value);
        } else if event.contains("cycles") {
            metrics.cpu_cycles = Some(value);
        }
    }

    metrics
}

/// Parse `vmstat <interval> <count>` output into a [`VmstatSample`].
///
/// Only the last data row matters: with `vmstat 1 2` the first row is
/// averages since boot, the second the actual interval sample. A table
/// with fewer than 3 lines (two headers + at least one data row) or a
/// final row with fewer than 15 columns yields a sample with every field
/// absent.
pub fn parse_vmstat_output(output: &str) -> VmstatSample {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 3 {
        return VmstatSample::default();
    }

    let cols: Vec<&str> = lines[lines.len() - 1].split_whitespace().collect();
    if cols.len() < 15 {
        return VmstatSample::default();
    }

    let int = |i: usize| cols[i].parse::<u64>().ok();
    let float = |i: usize| cols[i].parse::<f64>().ok();

    VmstatSample {
        procs_running: int(0),
        procs_blocked: int(1),
        swap_used_kb: int(2),
        memory_free_kb: int(3),
        // used memory = buff + cache columns
        memory_used_kb: match (int(4), int(5)) {
            (Some(buff), Some(cache)) => Some(buff + cache),
            _ => None,
        },
        io_blocks_in: int(8),
        io_blocks_out: int(9),
        cpu_user_percent: float(12),
        cpu_system_percent: float(13),
        cpu_idle_percent: float(14),
    }
}

/// Parse `iostat -x -d -k <interval> <count>` output into per-device samples.
///
/// Device rows follow a header line starting with `Device` and run until a
/// blank line or an `avg-cpu` section. Rows with fewer than 14 columns, or
/// whose throughput/utilization columns fail to parse, are skipped rather
/// than reported partially. Throughput rates are also multiplied by the
/// sample window to approximate totals for the run.
pub fn parse_iostat_output(output: &str) -> Vec<IostatDeviceSample> {
    let mut devices = Vec::new();
    let mut in_table = false;

    for line in output.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("Device") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("avg-cpu") {
            in_table = false;
            continue;
        }

        let cols: Vec<&str> = trimmed.split_whitespace().collect();
        if cols.len() < 14 {
            continue;
        }

        let f = |i: usize| cols[i].parse::<f64>().ok();
        let (Some(read_kb), Some(write_kb), Some(util)) = (f(3), f(4), f(cols.len() - 1)) else {
            continue;
        };

        let await_ms = match (f(9), f(10)) {
            (Some(r), Some(w)) => (r + w) / 2.0,
            (Some(r), None) => r,
            (None, Some(w)) => w,
            (None, None) => 0.0,
        };

        devices.push(IostatDeviceSample {
            device: cols[0].to_string(),
            read_kb_per_sec: read_kb,
            write_kb_per_sec: write_kb,
            cpu_util: util,
            cpu_idle: 100.0 - util,
            await_ms,
            total_reads: read_kb * SAMPLE_WINDOW_SECS,
            total_writes: write_kb * SAMPLE_WINDOW_SECS,
        });
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perf_parses_grouped_counters() {
        let output = " 1,234,567      cycles\n 987,654      cache-misses\n";
        let metrics = parse_perf_output(output);
        assert_eq!(metrics.cpu_cycles, Some(1_234_567));
        assert_eq!(metrics.cache_misses, Some(987_654));
        assert_eq!(metrics.instructions, None);
        assert_eq!(metrics.cache_references, None);
        assert_eq!(metrics.branch_misses, None);
    }

    #[test]
    fn perf_parses_full_stat_output() {
        let output = "\n Performance counter stats for './prog':\n\n\
                      \t 12,345,678      cycles\n\
                      \t 23,456,789      instructions              #    1.90  insn per cycle\n\
                      \t    456,789      cache-references\n\
                      \t     12,345      cache-misses              #    2.70 % of all cache refs\n\
                      \t      6,789      branch-misses\n\n\
                      \t 0.004123456 seconds time elapsed\n";
        let metrics = parse_perf_output(output);
        assert_eq!(metrics.cpu_cycles, Some(12_345_678));
        assert_eq!(metrics.instructions, Some(23_456_789));
        assert_eq!(metrics.cache_references, Some(456_789));
        assert_eq!(metrics.cache_misses, Some(12_345));
        assert_eq!(metrics.branch_misses, Some(6_789));
    }

    #[test]
    fn perf_skips_unsupported_counters() {
        let output = " <not supported>      cache-references\n 1,000      cycles\n";
        let metrics = parse_perf_output(output);
        assert_eq!(metrics.cache_references, None);
        assert_eq!(metrics.cpu_cycles, Some(1_000));
    }

    #[test]
    fn perf_empty_input_yields_nothing() {
        let metrics = parse_perf_output("");
        assert_eq!(metrics, PerfMetrics::default());
    }

    #[test]
    fn vmstat_uses_last_row() {
        let output = "\
procs -----------memory---------- ---swap-- -----io---- -system-- ------cpu-----
 r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st
 1  0      0 402132  10240  81920    0    0    55    21  100  200  5  3 91  1  0
 2  1    512 398000  11000  82000    0    0    70    33  150  250 12  6 80  2  0
";
        let sample = parse_vmstat_output(output);
        assert_eq!(sample.procs_running, Some(2));
        assert_eq!(sample.procs_blocked, Some(1));
        assert_eq!(sample.swap_used_kb, Some(512));
        assert_eq!(sample.memory_free_kb, Some(398_000));
        assert_eq!(sample.memory_used_kb, Some(11_000 + 82_000));
        assert_eq!(sample.io_blocks_in, Some(70));
        assert_eq!(sample.io_blocks_out, Some(33));
        assert_eq!(sample.cpu_user_percent, Some(12.0));
        assert_eq!(sample.cpu_system_percent, Some(6.0));
        assert_eq!(sample.cpu_idle_percent, Some(80.0));
    }

    #[test]
    fn vmstat_too_few_lines_yields_all_absent() {
        let sample = parse_vmstat_output("header\n 1 0 0\n");
        assert_eq!(sample, VmstatSample::default());
    }

    #[test]
    fn vmstat_too_few_columns_yields_all_absent() {
        let output = "h1\nh2\n 1 0 0 402132 10240\n";
        let sample = parse_vmstat_output(output);
        assert_eq!(sample, VmstatSample::default());
    }

    #[test]
    fn vmstat_never_panics_on_garbage() {
        let sample = parse_vmstat_output("complete nonsense\nmore nonsense");
        assert_eq!(sample, VmstatSample::default());
    }

    #[test]
    fn iostat_parses_device_rows() {
        let output = "\
Linux 6.1.0 (guest) \t01/01/26 \t_x86_64_\t(2 CPU)

Device            r/s     w/s     rkB/s     wkB/s   rrqm/s   wrqm/s  %rrqm  %wrqm r_await w_await aqu-sz rareq-sz wareq-sz  svctm  %util
vda              3.00    5.00    128.00    256.00     0.00     0.10   0.00   2.00    0.40    0.80   0.01    42.70    51.20   0.30  15.0
vdb              0.00    0.00      0.00      0.00     0.00     0.00   0.00   0.00    0.00    0.00   0.00     0.00     0.00   0.00   0.0
";
        let devices = parse_iostat_output(output);
        assert_eq!(devices.len(), 2);

        let vda = &devices[0];
        assert_eq!(vda.device, "vda");
        assert_eq!(vda.read_kb_per_sec, 128.0);
        assert_eq!(vda.write_kb_per_sec, 256.0);
        assert_eq!(vda.cpu_util, 15.0);
        assert_eq!(vda.cpu_idle, 85.0);
        assert_eq!(vda.await_ms, (0.4 + 0.8) / 2.0);
        assert_eq!(vda.total_reads, 128.0 * 2.0);
        assert_eq!(vda.total_writes, 256.0 * 2.0);
    }

    #[test]
    fn iostat_skips_short_rows() {
        let output = "Device r/s w/s rkB/s\nvda 1.0 2.0 3.0\n";
        assert!(parse_iostat_output(output).is_empty());
    }

    #[test]
    fn iostat_stops_at_blank_line() {
        let output = "\
Device            r/s     w/s     rkB/s     wkB/s   rrqm/s   wrqm/s  %rrqm  %wrqm r_await w_await aqu-sz rareq-sz wareq-sz %util
vda              1.00    1.00      8.00      8.00     0.00     0.00   0.00   0.00    0.10    0.10   0.00     8.00     8.00   1.0

not-a-device-row that should be ignored 1 2 3 4 5 6 7 8 9 10 11 12 13 14
";
        let devices = parse_iostat_output(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device, "vda");
    }

    #[test]
    fn iostat_empty_input_yields_empty() {
        assert!(parse_iostat_output("").is_empty());
    }
}
