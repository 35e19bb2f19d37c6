//! Calendar quarter cursor over EDGAR index directories.

use chrono::{Datelike, NaiveDate};

/// A `(year, quarter)` position inside the quarterly index tree.
///
/// Ordered by year then quarter, so walking forward can stop with a plain
/// comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Qtr {
    year: i32,
    qtr: u32,
}

impl Qtr {
    /// The quarter containing `date`.
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            qtr: month_qtr(date.month()),
        }
    }

    /// The index directory path of this quarter, e.g. `"2024/QTR1"`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/QTR{}", self.year, self.qtr)
    }

    /// Advances to the next quarter, wrapping into the next year after Q4,
    /// and returns the new path.
    pub fn next(&mut self) -> String {
        if self.qtr == 4 {
            self.year += 1;
            self.qtr = 1;
        } else {
            self.qtr += 1;
        }
        self.path()
    }
}

/// `ceil(month / 3)`.
fn month_qtr(month: u32) -> u32 {
    month.div_ceil(3)
}
