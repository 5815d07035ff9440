//! Decoding result files back into rows

use std::fs;

use crate::encoding::{ColumnType, CopyFormat, Row, RowStreamDecoder};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::TransactionContext;
use crate::observability::{log_event, Event};
use crate::result_file::{file_size, ResultId};

/// Rows read from a set of results plus one warning per missing result
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReadOutcome {
    pub rows: Vec<Row>,
    pub warnings: Vec<String>,
}

/// Reads results from this backend's namespace
#[derive(Debug, Clone, Copy)]
pub struct ResultReader<'a> {
    context: &'a TransactionContext,
}

impl<'a> ResultReader<'a> {
    pub fn new(context: &'a TransactionContext) -> Self {
        Self { context }
    }

    /// Read every result in order and concatenate the rows.
    ///
    /// A missing file contributes no rows and one warning; the call still
    /// succeeds. Invalid identifiers and undecodable files are errors.
    pub fn read_results<S: AsRef<str>>(
        &self,
        result_ids: &[S],
        schema: &[ColumnType],
        format: CopyFormat,
    ) -> ExchangeResult<ReadOutcome> {
        let result_ids = result_ids
            .iter()
            .map(|id| ResultId::new(id.as_ref()))
            .collect::<ExchangeResult<Vec<_>>>()?;

        let decoder = RowStreamDecoder::new(schema, format, self.context.text_options().clone())?;
        let mut outcome = ReadOutcome::default();

        for result_id in &result_ids {
            let path = self.context.result_path(result_id);
            if file_size(&path)?.is_none() {
                outcome.warnings.push(self.report_missing(result_id));
                continue;
            }

            let data = fs::read(&path).map_err(|e| {
                ExchangeError::file_io(
                    format!("could not read intermediate result \"{}\"", result_id),
                    e,
                )
            })?;
            let rows = decoder.decode(&data).map_err(|e| {
                ExchangeError::from(e).with_details(format!("result: {}", result_id))
            })?;
            outcome.rows.extend(rows);
        }

        Ok(outcome)
    }

    fn report_missing(&self, result_id: &ResultId) -> String {
        self.context.metrics().increment_missing_results();
        let id = result_id.to_string();
        log_event(Event::ResultMissing, &[("result_id", id.as_str())]);
        format!(
            "could not find intermediate result \"{}\", it was most likely removed \
             due to a failure in a parallel process in the same distributed transaction",
            result_id
        )
    }
}
