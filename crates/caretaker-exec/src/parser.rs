//! Output parsers: turn captured stdout into a summary and structured data.

use caretaker_catalog::OutputParser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Parsed form of a command's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    /// One line for display and the audit log.
    pub summary: String,
    pub data: Value,
}

/// Apply `parser` to `stdout`. The error is a human-readable reason.
pub fn parse_output(
    parser: OutputParser,
    pattern: Option<&str>,
    stdout: &str,
) -> Result<ParsedOutput, String> {
    match parser {
        OutputParser::Text => Ok(parse_text(stdout)),
        OutputParser::Json => parse_json(stdout),
        OutputParser::Regex => {
            let pattern = pattern.ok_or("regex parser needs an output_pattern")?;
            parse_regex(pattern, stdout)
        }
        OutputParser::MemoryPressure => parse_memory_pressure(stdout),
        OutputParser::DiskUsage => parse_disk_usage(stdout),
        OutputParser::ProcessTable => parse_process_table(stdout),
    }
}

fn parse_text(stdout: &str) -> ParsedOutput {
    let text = stdout.trim();
    let summary = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("(no output)")
        .trim()
        .to_string();
    ParsedOutput {
        summary,
        data: json!({ "text": text, "lines": text.lines().count() }),
    }
}

fn parse_json(stdout: &str) -> Result<ParsedOutput, String> {
    let data: Value = serde_json::from_str(stdout.trim()).map_err(|e| e.to_string())?;
    let summary = match &data {
        Value::Object(map) => format!("object with {} keys", map.len()),
        Value::Array(items) => format!("{} items", items.len()),
        other => other.to_string(),
    };
    Ok(ParsedOutput { summary, data })
}

/// Named groups become keys; unnamed groups are keyed by index.
fn parse_regex(pattern: &str, stdout: &str) -> Result<ParsedOutput, String> {
    let re = Regex::new(pattern).map_err(|e| e.to_string())?;
    let caps = re
        .captures(stdout)
        .ok_or_else(|| format!("output did not match /{pattern}/"))?;

    let mut data = Map::new();
    for (i, name) in re.capture_names().enumerate().skip(1) {
        let Some(m) = caps.get(i) else { continue };
        let key = name.map_or_else(|| i.to_string(), str::to_string);
        data.insert(key, Value::String(m.as_str().to_string()));
    }
    let summary = data
        .iter()
        .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(ParsedOutput {
        summary: if summary.is_empty() {
            caps.get(0).map_or_else(String::new, |m| m.as_str().to_string())
        } else {
            summary
        },
        data: Value::Object(data),
    })
}

/// Understands `memory_pressure -Q` and `/proc/meminfo`.
fn parse_memory_pressure(stdout: &str) -> Result<ParsedOutput, String> {
    let free_re = Regex::new(r"memory free percentage:\s*(\d+)%").map_err(|e| e.to_string())?;
    if let Some(percent) = free_re
        .captures(stdout)
        .and_then(|c| c[1].parse::<u64>().ok())
    {
        return Ok(memory_summary(percent));
    }

    let field = |name: &str| -> Option<u64> {
        stdout.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse().ok()
        })
    };
    match (field("MemTotal"), field("MemAvailable")) {
        (Some(total), Some(available)) if total > 0 => {
            let mut parsed = memory_summary(available * 100 / total);
            parsed.data["total_kb"] = json!(total);
            parsed.data["available_kb"] = json!(available);
            Ok(parsed)
        }
        _ => Err("no memory free percentage in output".to_string()),
    }
}

fn memory_summary(free_percent: u64) -> ParsedOutput {
    let pressure = match free_percent {
        0..=10 => "critical",
        11..=25 => "warning",
        _ => "normal",
    };
    ParsedOutput {
        summary: format!("{free_percent}% memory free ({pressure})"),
        data: json!({ "free_percent": free_percent, "pressure": pressure }),
    }
}

/// `df -k` style table.
fn parse_disk_usage(stdout: &str) -> Result<ParsedOutput, String> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or("empty df output")?;
    if !header.to_lowercase().contains("filesystem") {
        return Err("missing df header".to_string());
    }

    let mut volumes = Vec::new();
    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let Some(capacity_idx) = cols.iter().position(|c| c.ends_with('%')) else {
            continue;
        };
        if capacity_idx < 4 {
            continue;
        }
        let num = |i: usize| cols[i].parse::<u64>().unwrap_or(0);
        let capacity: u64 = cols[capacity_idx]
            .trim_end_matches('%')
            .parse()
            .unwrap_or(0);
        // macOS adds iused/ifree/%iused before the mount point.
        let mount = cols
            .last()
            .filter(|_| cols.len() > capacity_idx + 1)
            .map_or("", |m| *m);
        volumes.push(json!({
            "filesystem": cols[..capacity_idx - 3].join(" "),
            "size_kb": num(capacity_idx - 3),
            "used_kb": num(capacity_idx - 2),
            "available_kb": num(capacity_idx - 1),
            "capacity_percent": capacity,
            "mount": mount,
        }));
    }

    let fullest = volumes
        .iter()
        .max_by_key(|v| v["capacity_percent"].as_u64().unwrap_or(0));
    let summary = match fullest {
        Some(v) => format!(
            "{} volumes, fullest {} at {}%",
            volumes.len(),
            v["mount"].as_str().unwrap_or("?"),
            v["capacity_percent"]
        ),
        None => "no volumes".to_string(),
    };
    Ok(ParsedOutput {
        summary,
        data: json!({ "volumes": volumes }),
    })
}

/// `ps` style table: header columns become keys, the last column keeps spaces.
fn parse_process_table(stdout: &str) -> Result<ParsedOutput, String> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<String> = lines
        .next()
        .ok_or("empty process table")?
        .split_whitespace()
        .map(|h| h.trim_start_matches('%').to_lowercase())
        .collect();
    if header.is_empty() {
        return Err("missing process table header".to_string());
    }

    let rows: Vec<Value> = lines
        .map(|line| {
            let mut cols = line.split_whitespace();
            let mut row = Map::new();
            for (i, key) in header.iter().enumerate() {
                let value = if i + 1 == header.len() {
                    cols.by_ref().collect::<Vec<_>>().join(" ")
                } else {
                    cols.next().unwrap_or_default().to_string()
                };
                row.insert(key.clone(), Value::String(value));
            }
            Value::Object(row)
        })
        .collect();

    let summary = match rows.first() {
        Some(top) => format!(
            "{} processes, top: {}",
            rows.len(),
            top.get(header[header.len() - 1].as_str())
                .and_then(Value::as_str)
                .unwrap_or("?")
        ),
        None => "0 processes".to_string(),
    };
    Ok(ParsedOutput {
        summary,
        data: json!({ "columns": header, "processes": rows }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_summary_is_first_line() {
        let parsed = parse_output(OutputParser::Text, None, "\n  hello\nworld\n").unwrap();
        assert_eq!(parsed.summary, "hello");
        let empty = parse_output(OutputParser::Text, None, "").unwrap();
        assert_eq!(empty.summary, "(no output)");
    }

    #[test]
    fn test_json() {
        let parsed = parse_output(OutputParser::Json, None, r#"{"tabs": 12, "windows": 2}"#).unwrap();
        assert_eq!(parsed.data["tabs"], 12);
        assert!(parse_output(OutputParser::Json, None, "not json").is_err());
    }

    #[test]
    fn test_regex_named_and_positional() {
        let parsed = parse_output(
            OutputParser::Regex,
            Some(r"System Integrity Protection status: (?P<status>\w+)"),
            "System Integrity Protection status: enabled.",
        )
        .unwrap();
        assert_eq!(parsed.data["status"], "enabled");
        assert_eq!(parsed.summary, "status=enabled");

        let positional = parse_output(OutputParser::Regex, Some(r"(\d+) tabs"), "Safari: 7 tabs").unwrap();
        assert_eq!(positional.data["1"], "7");
        assert!(parse_output(OutputParser::Regex, None, "x").is_err());
    }

    #[test]
    fn test_memory_pressure_macos() {
        let parsed = parse_output(
            OutputParser::MemoryPressure,
            None,
            "The system has 17179869184 (4194304 pages with a page size of 4096).\n\
             System-wide memory free percentage: 42%\n",
        )
        .unwrap();
        assert_eq!(parsed.data["free_percent"], 42);
        assert_eq!(parsed.data["pressure"], "normal");
        assert_eq!(parsed.summary, "42% memory free (normal)");
    }

    #[test]
    fn test_memory_pressure_meminfo() {
        let parsed = parse_output(
            OutputParser::MemoryPressure,
            None,
            "MemTotal:       16000000 kB\nMemFree:   100 kB\nMemAvailable:    1600000 kB\n",
        )
        .unwrap();
        assert_eq!(parsed.data["free_percent"], 10);
        assert_eq!(parsed.data["pressure"], "critical");
    }

    #[test]
    fn test_disk_usage_macos_df() {
        let out = "Filesystem     1024-blocks      Used Available Capacity iused     ifree %iused  Mounted on\n\
                   /dev/disk3s1s1   494384795  10464728 214829336     5%  404167 2148293360    0%   /\n\
                   /dev/disk3s5     494384795 263094200 214829336    56% 1876543 2148293360    0%   /System/Volumes/Data\n";
        let parsed = parse_output(OutputParser::DiskUsage, None, out).unwrap();
        let volumes = parsed.data["volumes"].as_array().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[1]["mount"], "/System/Volumes/Data");
        assert_eq!(volumes[1]["capacity_percent"], 56);
        assert_eq!(volumes[0]["available_kb"], 214829336u64);
        assert!(parsed.summary.contains("/System/Volumes/Data at 56%"));
    }

    #[test]
    fn test_process_table() {
        let out = "  PID  %CPU %MEM COMM\n  412  35.2  2.1 /Applications/Google Chrome.app/Contents/MacOS/Google Chrome\n   88   1.0  0.3 /usr/sbin/distnoted\n";
        let parsed = parse_output(OutputParser::ProcessTable, None, out).unwrap();
        let rows = parsed.data["processes"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["pid"], "412");
        assert_eq!(rows[0]["cpu"], "35.2");
        assert!(rows[0]["comm"].as_str().unwrap().ends_with("Google Chrome"));
        assert!(parsed.summary.starts_with("2 processes"));
    }
}
