//! lcov tracefile parsing.
//!
//! Only the records needed for line and function totals are interpreted
//! (`SF`, `FN`, `FNDA`, `DA`, `end_of_record`). Summary and branch records
//! are accepted and ignored.

use std::path::PathBuf;

use super::map::{CoverageMap, FileCoverage};

/// Why a sample was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("empty tracefile")]
    Empty,
    #[error("tracefile has no SF record")]
    NoSourceFile,
    #[error("malformed record on line {line}: {record}")]
    Malformed { line: usize, record: String },
}

const IGNORED_RECORDS: &[&str] = &["TN", "FNF", "FNH", "LF", "LH", "BRDA", "BRF", "BRH", "VER", "FNL", "FNA"];

fn parse_count(text: &str) -> Option<u64> {
    // gcov may report huge or negative-wrapped counts as floats; clamp.
    let text = text.trim();
    text.parse::<u64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
}

/// Parse one tracefile. Any malformed record rejects the whole sample.
pub fn parse_tracefile(text: &str) -> Result<CoverageMap, SampleError> {
    if text.trim().is_empty() {
        return Err(SampleError::Empty);
    }

    let mut map = CoverageMap::default();
    let mut current: Option<(PathBuf, FileCoverage)> = None;
    let mut saw_source = false;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || SampleError::Malformed {
            line: index + 1,
            record: line.to_string(),
        };

        if line == "end_of_record" {
            let (path, file) = current.take().ok_or_else(malformed)?;
            map.add_file(path, file);
            continue;
        }

        let (tag, value) = line.split_once(':').ok_or_else(malformed)?;
        match tag {
            "SF" => {
                if value.is_empty() || current.is_some() {
                    return Err(malformed());
                }
                saw_source = true;
                current = Some((PathBuf::from(value), FileCoverage::default()));
            }
            "DA" => {
                let file = current.as_mut().map(|(_, f)| f).ok_or_else(malformed)?;
                let mut fields = value.split(',');
                let line_no = fields.next().and_then(|v| v.trim().parse::<u32>().ok()).ok_or_else(malformed)?;
                let hits = fields.next().and_then(parse_count).ok_or_else(malformed)?;
                *file.lines.entry(line_no).or_insert(0) += hits;
            }
            "FN" => {
                let file = current.as_mut().map(|(_, f)| f).ok_or_else(malformed)?;
                // `FN:<start>,<name>` or lcov 2.x `FN:<start>,<end>,<name>`.
                let parts: Vec<&str> = value.splitn(3, ',').collect();
                let start = parts.first().and_then(|v| v.trim().parse::<u32>().ok()).ok_or_else(malformed)?;
                let name = match parts.as_slice() {
                    [_, name] => name.to_string(),
                    [_, end, name] if end.trim().parse::<u32>().is_ok() => name.to_string(),
                    // A demangled name containing a comma (`f(int, int)`).
                    [_, head, tail] => format!("{},{}", head, tail),
                    _ => return Err(malformed()),
                };
                if name.is_empty() {
                    return Err(malformed());
                }
                file.declare_function(name, start);
            }
            "FNDA" => {
                let file = current.as_mut().map(|(_, f)| f).ok_or_else(malformed)?;
                let (hits, name) = value.split_once(',').ok_or_else(malformed)?;
                let hits = parse_count(hits).ok_or_else(malformed)?;
                if name.is_empty() {
                    return Err(malformed());
                }
                file.record_function_hits(name, hits);
            }
            tag if IGNORED_RECORDS.contains(&tag) => {}
            _ => return Err(malformed()),
        }
    }

    if !saw_source {
        return Err(SampleError::NoSourceFile);
    }
    if let Some((path, _)) = current {
        // Truncated final record.
        return Err(SampleError::Malformed {
            line: text.lines().count(),
            record: format!("SF:{} without end_of_record", path.display()),
        });
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SAMPLE: &str = "TN:\nSF:/proj/src/Shape.cpp\nFN:4,_ZN5Shape4AreaEv\nFNDA:2,_ZN5Shape4AreaEv\nFNF:1\nFNH:1\nDA:4,2\nDA:5,2\nDA:7,0\nLF:3\nLH:2\nend_of_record\n";

    #[test]
    fn test_parse_sample() {
        let map = parse_tracefile(SAMPLE).unwrap();
        let file = map.file(Path::new("/proj/src/Shape.cpp")).unwrap();
        assert_eq!(file.lines.get(&4), Some(&2));
        assert_eq!(file.lines.get(&7), Some(&0));
        let f = file.functions.get("_ZN5Shape4AreaEv").unwrap();
        assert_eq!(f.start_line, 4);
        assert_eq!(f.hits, 2);
        assert_eq!(map.line_totals(), (3, 2));
    }

    #[test]
    fn test_rejects_empty_and_sourceless() {
        assert_eq!(parse_tracefile(""), Err(SampleError::Empty));
        assert_eq!(parse_tracefile("  \n"), Err(SampleError::Empty));
        assert_eq!(parse_tracefile("TN:\n"), Err(SampleError::NoSourceFile));
    }

    #[test]
    fn test_rejects_malformed_records() {
        let bad = "SF:/proj/a.cpp\nDA:x,1\nend_of_record\n";
        assert!(matches!(parse_tracefile(bad), Err(SampleError::Malformed { line: 2, .. })));

        let orphan = "DA:1,1\n";
        assert!(matches!(parse_tracefile(orphan), Err(SampleError::Malformed { .. })));

        let truncated = "SF:/proj/a.cpp\nDA:1,1\n";
        assert!(matches!(parse_tracefile(truncated), Err(SampleError::Malformed { .. })));

        let garbage = "SF:/proj/a.cpp\n\u{0}\u{1}binary\nend_of_record\n";
        assert!(parse_tracefile(garbage).is_err());
    }

    #[test]
    fn test_lcov2_function_record_with_end_line() {
        let text = "SF:/proj/a.cpp\nFN:3,9,_Z3foov\nFNDA:1,_Z3foov\nDA:3,1\nend_of_record\n";
        let map = parse_tracefile(text).unwrap();
        let file = map.file(Path::new("/proj/a.cpp")).unwrap();
        assert_eq!(file.functions.get("_Z3foov").unwrap().start_line, 3);
    }
}
