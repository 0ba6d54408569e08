//! File-based inputs: appended signal log, price, market and account snapshots.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use tb_core::{AccountState, Price, TradeSignal};
use tb_position::MarketContext;

use crate::error::AppResult;

/// Tails a newline-delimited JSON signal file.
///
/// Only complete lines are consumed; a partially written last line is picked
/// up on the next poll. A file that shrinks is treated as rotated and read
/// from the start.
#[derive(Debug)]
pub struct SignalSource {
    path: PathBuf,
    offset: u64,
}

impl SignalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Start after everything already in the file.
    pub fn skip_existing(&mut self) -> AppResult<()> {
        self.offset = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// New signals since the last poll. Malformed lines are logged and skipped.
    pub fn poll(&mut self) -> AppResult<Vec<TradeSignal>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(path = %self.path.display(), "Signal file shrank; reading from start");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=end];
        self.offset += complete.len() as u64;

        let mut signals = Vec::new();
        for raw in complete.split(|&b| b == b'\n') {
            let Ok(line) = std::str::from_utf8(raw) else {
                warn!(bytes = raw.len(), "Skipping signal line with invalid UTF-8");
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeSignal>(line) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!(error = %e, line, "Skipping malformed signal line"),
            }
        }
        debug!(count = signals.len(), offset = self.offset, "Signals polled");
        Ok(signals)
    }
}

/// Latest prices keyed by upper-case ticker. A missing file is an empty map.
pub fn read_prices(path: &Path) -> AppResult<HashMap<String, Price>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let raw: HashMap<String, Price> = serde_json::from_str(&content)?;
    Ok(raw
        .into_iter()
        .map(|(ticker, price)| (ticker.to_ascii_uppercase(), price))
        .collect())
}

/// Account snapshot, if the file exists.
pub fn read_account(path: &Path) -> AppResult<Option<AccountState>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Bars and cloud state per ticker for the exit checks that need them.
pub fn read_market(path: &Path) -> AppResult<HashMap<String, MarketContext>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let raw: HashMap<String, MarketContext> = serde_json::from_str(&content)?;
    Ok(raw
        .into_iter()
        .map(|(ticker, ctx)| (ticker.to_ascii_uppercase(), ctx))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    const LINE: &str = r#"{"ticker":"AAPL","direction":"long","signal_type":"breakout","timeframe":"15m","conviction":"82","entry_price":"185","stop_loss":"180"}"#;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_tails_complete_lines_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.jsonl");
        let mut source = SignalSource::new(&path);
        assert!(source.poll().unwrap().is_empty());

        append(&path, &format!("{LINE}\n{}", &LINE[..20]));
        let first = source.poll().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].ticker, "AAPL");
        assert_eq!(first[0].entry_price, Price::new(dec!(185)));

        append(&path, &format!("{}\n", &LINE[20..]));
        assert_eq!(source.poll().unwrap().len(), 1);
        assert!(source.poll().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.jsonl");
        append(&path, &format!("not json\n\n{LINE}\n"));
        let mut source = SignalSource::new(&path);
        assert_eq!(source.poll().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_utf8_line_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.jsonl");
        append(&path, &format!("{LINE}\n"));
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"\xff\xfe garbage\n").unwrap();
        }
        append(&path, &format!("{LINE}\n"));

        let mut source = SignalSource::new(&path);
        assert_eq!(source.poll().unwrap().len(), 2);
        assert_eq!(source.offset(), std::fs::metadata(&path).unwrap().len());
        assert!(source.poll().unwrap().is_empty());
    }

    #[test]
    fn test_skip_existing_and_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.jsonl");
        append(&path, &format!("{LINE}\n{LINE}\n"));

        let mut source = SignalSource::new(&path);
        source.skip_existing().unwrap();
        assert!(source.poll().unwrap().is_empty());

        std::fs::write(&path, format!("{LINE}\n")).unwrap();
        assert_eq!(source.poll().unwrap().len(), 1);
    }

    #[test]
    fn test_prices_and_account() {
        let dir = TempDir::new().unwrap();
        let prices = dir.path().join("prices.json");
        assert!(read_prices(&prices).unwrap().is_empty());

        std::fs::write(&prices, r#"{"aapl": "186.5", "MSFT": 410}"#).unwrap();
        let map = read_prices(&prices).unwrap();
        assert_eq!(map["AAPL"], Price::new(dec!(186.5)));
        assert_eq!(map["MSFT"], Price::new(dec!(410)));

        let account = dir.path().join("account.json");
        assert!(read_account(&account).unwrap().is_none());
        std::fs::write(
            &account,
            r#"{"equity":"50000","cash":"50000","buying_power":"100000","starting_equity":"50000"}"#,
        )
        .unwrap();
        let acct = read_account(&account).unwrap().unwrap();
        assert_eq!(acct.buying_power, Price::new(dec!(100000)));
        assert!(acct.open_positions.is_empty());
    }
}
