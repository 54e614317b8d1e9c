use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::models::DailyRecord;

/// Daily observations ordered by date, at most one record per calendar day.
#[derive(Debug, Clone, Default)]
pub struct DailyRecordStore {
    records: Vec<DailyRecord>,
}

impl DailyRecordStore {
    pub fn new(mut records: Vec<DailyRecord>) -> Result<Self, StoreError> {
        records.sort_by_key(|record| record.date);
        if let Some(pair) = records.windows(2).find(|pair| pair[0].date == pair[1].date) {
            return Err(StoreError::DuplicateDate(pair[1].date));
        }
        Ok(Self { records })
    }

    pub fn load_json(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<DailyRecord> = serde_json::from_str(&raw)?;
        Self::new(records)
    }

    /// Reads a wide CSV: a `date` column plus one numeric column per field.
    /// Empty cells leave the field absent for that day.
    pub fn load_csv(path: &Path) -> Result<Self, StoreError> {
        let mut reader = csv::Reader::from_path(path)?;
        Self::new(parse_csv(&mut reader)?)
    }

    /// Folds in records refreshed out-of-band. Incoming fields overwrite
    /// same-named fields of an existing day; other fields are kept.
    pub fn merge(&mut self, incoming: Vec<DailyRecord>) {
        let mut by_date: BTreeMap<NaiveDate, DailyRecord> = self
            .records
            .drain(..)
            .map(|record| (record.date, record))
            .collect();

        for record in incoming {
            match by_date.get_mut(&record.date) {
                Some(existing) => existing.fields.extend(record.fields),
                None => {
                    by_date.insert(record.date, record);
                }
            }
        }

        self.records = by_date.into_values().collect();
    }

    pub fn records(&self) -> &[DailyRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&DailyRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn parse_csv<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
) -> Result<Vec<DailyRecord>, StoreError> {
    let headers = reader.headers()?.clone();
    let date_index = headers
        .iter()
        .position(|header| header.trim() == "date")
        .ok_or(StoreError::MissingDateColumn)?;

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        // header is line 1
        let line = index + 2;
        let raw_date = row.get(date_index).unwrap_or_default().trim();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|_| {
            StoreError::InvalidDate {
                row: line,
                value: raw_date.to_string(),
            }
        })?;

        let mut record = DailyRecord::new(date);
        for (column, (header, cell)) in headers.iter().zip(row.iter()).enumerate() {
            let (header, cell) = (header.trim(), cell.trim());
            if column == date_index || cell.is_empty() {
                continue;
            }
            let value = cell
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| StoreError::InvalidValue {
                    row: line,
                    column: header.to_string(),
                    value: cell.to_string(),
                })?;
            record = record.with(header, value);
        }
        records.push(record);
    }

    Ok(records)
}
