//! Cell and header formats used on the remote sheets.
//!
//! Dates render as `M/D/YYYY` without zero padding (the daily worksheet name
//! and the master roster column header). Times render as `HH:MM:SS`.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Header of the identifier column on both sheets.
pub const ID_HEADER: &str = "ID";
/// Cell value written to the master roster for a present identifier.
pub const PRESENT_MARKER: &str = "Present";

/// `7/5/2025` for 2025-07-05.
pub fn sheet_date_label(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

/// `09:04:31` for a scan at 09:04:31.250.
pub fn sheet_time_label(at: NaiveDateTime) -> String {
    at.format("%H:%M:%S").to_string()
}
