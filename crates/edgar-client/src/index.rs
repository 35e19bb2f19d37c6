//! Parser for EDGAR's pipe-delimited master index files.
//!
//! A master index (the gunzipped content of `master.gz`) looks like:
//!
//! ```text
//! Description:           Master Index of EDGAR Dissemination Feed
//! Last Data Received:    January 11, 2024
//! Anonymous FTP:         ftp://ftp.sec.gov/edgar/
//!
//! CIK|Company Name|Form Type|Date Filed|Filename
//! --------------------------------------------------------------------
//! 1000045|NICHOLAS FINANCIAL INC|10-Q|2024-01-10|edgar/data/...
//! ```
//!
//! [`IndexFile::read`] consumes the header block; [`IndexFile::iterate`]
//! then streams the records.

use std::collections::HashMap;
use std::io::BufRead;

use chrono::NaiveDate;
use edgar_core::{EdgarError, Result};

/// Header key carrying the date of the most recent filing in the index.
const LAST_FILED_NAME: &str = "Last Data Received";

/// Format of the [`LAST_FILED_NAME`] header value.
const LAST_FILED_FORMAT: &str = "%B %d, %Y";

/// Format of the `Date Filed` record field.
const DATE_FILED_FORMAT: &str = "%Y-%m-%d";

const FIELD_DELIMITER: char = '|';
const NUM_FIELDS: usize = 5;

const IDX_CIK: usize = 0;
const IDX_COMPANY_NAME: usize = 1;
const IDX_FORM_TYPE: usize = 2;
const IDX_DATE_FILED: usize = 3;
const IDX_FILENAME: usize = 4;

/// One filing record of a master index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexItem {
    /// Central Index Key of the filer.
    pub cik: u32,
    /// Date the filing was received.
    pub filed: NaiveDate,
    /// Company name as listed in the index.
    pub company_name: String,
    /// Form type (e.g. `10-K`).
    pub form_type: String,
    /// Path of the filing document below `/Archives`.
    pub filename: String,
}

/// A master index file with its header block consumed.
#[derive(Debug)]
pub struct IndexFile<R> {
    reader: R,
    headers: HashMap<String, String>,
    field_names: Vec<String>,
    last_filed: NaiveDate,
}

impl<R: BufRead> IndexFile<R> {
    /// Reads the header block: `Name: Value` lines up to the first blank
    /// line, the mandatory "Last Data Received" date, the pipe-separated
    /// row-header line and the `---` divider.
    ///
    /// Fails when the headers are absent, the date is unparseable, or the
    /// row header or divider is missing.
    pub fn read(mut reader: R) -> Result<Self> {
        let headers = read_index_header(&mut reader)?;

        let last_filed = headers
            .get(LAST_FILED_NAME)
            .ok_or_else(|| {
                EdgarError::Parse(format!("header {LAST_FILED_NAME:?} not found"))
            })
            .and_then(|value| {
                NaiveDate::parse_from_str(value, LAST_FILED_FORMAT).map_err(|e| {
                    EdgarError::Parse(format!(
                        "failed parse header {LAST_FILED_NAME:?} = {value:?}: {e}"
                    ))
                })
            })?;

        let row_header = skip_empty_lines(&mut reader)?.ok_or_else(|| {
            EdgarError::Parse("row header not found after index headers".to_string())
        })?;
        let field_names = row_header
            .split(FIELD_DELIMITER)
            .map(|s| s.trim().to_string())
            .collect();

        match read_line(&mut reader)? {
            Some(line) if line.starts_with("---") => {}
            Some(line) => {
                return Err(EdgarError::Parse(format!(
                    "got unexpected line {line:?} after row header"
                )))
            }
            None => {
                return Err(EdgarError::Parse(
                    "divider not found after row header".to_string(),
                ))
            }
        }

        Ok(Self {
            reader,
            headers,
            field_names,
            last_filed,
        })
    }

    /// The header block, copied.
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    /// The row-header field names, copied.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.field_names.clone()
    }

    /// The parsed "Last Data Received" date.
    #[must_use]
    pub fn last_filed(&self) -> NaiveDate {
        self.last_filed
    }

    /// Streams the records, calling `f` for each. Stops with the first
    /// error, from a malformed record or from `f` itself.
    pub fn iterate(&mut self, mut f: impl FnMut(&IndexItem) -> Result<()>) -> Result<()> {
        while let Some(line) = read_line(&mut self.reader)? {
            if line.is_empty() {
                continue;
            }
            let item = parse_record(&line)?;
            f(&item)?;
        }
        Ok(())
    }

    /// Aggregates the records into `CIK -> max(Date Filed)`.
    pub fn companies_last_filed(&mut self) -> Result<HashMap<u32, NaiveDate>> {
        let mut last_filed: HashMap<u32, NaiveDate> = HashMap::new();
        self.iterate(|item| {
            let entry = last_filed.entry(item.cik).or_insert(item.filed);
            if item.filed > *entry {
                *entry = item.filed;
            }
            Ok(())
        })?;
        Ok(last_filed)
    }
}

fn read_index_header(reader: &mut impl BufRead) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    while let Some(line) = read_line(reader)? {
        if line.is_empty() {
            break;
        }
        let (name, value) = split_header_line(&line)?;
        if name.is_empty() || value.is_empty() {
            return Err(EdgarError::Parse(format!("invalid header line {line:?}")));
        }
        headers.insert(name, value);
    }
    if headers.is_empty() {
        return Err(EdgarError::Parse("headers not found".to_string()));
    }
    Ok(headers)
}

fn split_header_line(line: &str) -> Result<(String, String)> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(EdgarError::Parse(format!(
            "separator not found in header line {line:?}"
        )));
    };
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Reads the next trimmed line, or `None` at EOF.
fn read_line(reader: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| EdgarError::Parse(format!("read line: {e}")))?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn skip_empty_lines(reader: &mut impl BufRead) -> Result<Option<String>> {
    while let Some(line) = read_line(reader)? {
        if !line.is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn parse_record(line: &str) -> Result<IndexItem> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if fields.len() < NUM_FIELDS {
        return Err(EdgarError::Parse(format!(
            "unexpected num of fields in record {line:?}"
        )));
    }

    let cik = fields[IDX_CIK].parse().map_err(|e| {
        EdgarError::Parse(format!("failed parse {:?} as CIK: {e}", fields[IDX_CIK]))
    })?;
    let filed = NaiveDate::parse_from_str(fields[IDX_DATE_FILED], DATE_FILED_FORMAT)
        .map_err(|e| {
            EdgarError::Parse(format!(
                "failed parse {:?} as Date Filed: {e}",
                fields[IDX_DATE_FILED]
            ))
        })?;

    Ok(IndexItem {
        cik,
        filed,
        company_name: fields[IDX_COMPANY_NAME].to_string(),
        form_type: fields[IDX_FORM_TYPE].to_string(),
        filename: fields[IDX_FILENAME].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
Description:           Master Index of EDGAR Dissemination Feed by Company Name
Last Data Received:    January 11, 2024
Anonymous FTP:         ftp://ftp.sec.gov/edgar/
Cloud HTTP:            https://www.sec.gov/Archives/



CIK|Company Name|Form Type|Date Filed|Filename
--------------------------------------------------------------------------------
9984|BARNES GROUP INC|10-K|2024-01-11|edgar/data/9984/0000009984-24-000004.txt
1000045|NICHOLAS FINANCIAL INC|8-K|2024-01-02|edgar/data/1000045/0001000045-24-000001.txt
1000045|NICHOLAS FINANCIAL INC|10-Q|2024-01-10|edgar/data/1000045/0001000045-24-000002.txt
";

    fn read(content: &str) -> Result<IndexFile<Cursor<Vec<u8>>>> {
        IndexFile::read(Cursor::new(content.as_bytes().to_vec()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn reads_headers() {
        let file = read(SAMPLE).unwrap();
        let headers = file.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers["Last Data Received"], "January 11, 2024");
        assert_eq!(headers["Anonymous FTP"], "ftp://ftp.sec.gov/edgar/");
        assert_eq!(file.last_filed(), date(2024, 1, 11));
        assert_eq!(
            file.field_names(),
            vec!["CIK", "Company Name", "Form Type", "Date Filed", "Filename"]
        );
    }

    #[test]
    fn iterates_records() {
        let mut file = read(SAMPLE).unwrap();
        let mut items = Vec::new();
        file.iterate(|item| {
            items.push(item.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            IndexItem {
                cik: 9984,
                filed: date(2024, 1, 11),
                company_name: "BARNES GROUP INC".to_string(),
                form_type: "10-K".to_string(),
                filename: "edgar/data/9984/0000009984-24-000004.txt".to_string(),
            }
        );
    }

    #[test]
    fn iterate_stops_on_callback_error() {
        let mut file = read(SAMPLE).unwrap();
        let mut seen = 0;
        let err = file
            .iterate(|_| {
                seen += 1;
                Err(EdgarError::Other("stop".to_string()))
            })
            .unwrap_err();
        assert_eq!(seen, 1);
        assert!(err.to_string().contains("stop"));
    }

    #[test]
    fn companies_last_filed_keeps_the_max() {
        let mut file = read(SAMPLE).unwrap();
        let companies = file.companies_last_filed().unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[&1000045], date(2024, 1, 10));
        assert_eq!(companies[&9984], date(2024, 1, 11));
    }

    #[test]
    fn short_record_is_fatal() {
        let content = SAMPLE.to_string() + "1000045|TRUNCATED|10-Q\n";
        let mut file = read(&content).unwrap();
        let err = file.iterate(|_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("unexpected num of fields"));
    }

    #[test]
    fn bad_cik_is_fatal() {
        let content = SAMPLE.to_string() + "not-a-cik|X|10-Q|2024-01-10|edgar/x.txt\n";
        let mut file = read(&content).unwrap();
        assert!(file.iterate(|_| Ok(())).is_err());
    }

    #[test]
    fn bad_filed_date_is_fatal() {
        let content = SAMPLE.to_string() + "9984|X|10-Q|01/10/2024|edgar/x.txt\n";
        let mut file = read(&content).unwrap();
        assert!(file.iterate(|_| Ok(())).is_err());
    }

    #[test]
    fn missing_headers() {
        let err = read("\nCIK|Company Name\n---\n").unwrap_err();
        assert!(err.to_string().contains("headers not found"));
    }

    #[test]
    fn missing_last_data_received() {
        let err = read("Description: something\n\nCIK|X\n---\n").unwrap_err();
        assert!(err.to_string().contains("Last Data Received"));
    }

    #[test]
    fn unparseable_last_data_received() {
        let err = read("Last Data Received: soon\n\nCIK|X\n---\n").unwrap_err();
        assert!(err.to_string().contains("failed parse header"));
    }

    #[test]
    fn missing_divider() {
        let err = read(
            "Last Data Received: January 11, 2024\n\nCIK|Company Name|Form Type|Date Filed|Filename\n9984|X|10-K|2024-01-11|f.txt\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("after row header"));
    }

    #[test]
    fn header_line_without_separator() {
        let err = read("no separator here\n\nCIK|X\n---\n").unwrap_err();
        assert!(err.to_string().contains("separator not found"));
    }

    #[test]
    fn empty_index_has_no_records() {
        let content = "Last Data Received: January 11, 2024\n\nCIK|Company Name|Form Type|Date Filed|Filename\n---\n";
        let mut file = read(content).unwrap();
        let companies = file.companies_last_filed().unwrap();
        assert!(companies.is_empty());
    }
}
