//! Commands sent to the result service, rendered as text and parsed back

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::{DistributedTransactionId, NodeId};
use crate::result_file::ResultId;

use super::NodeAddress;

const RECEIVE_SUFFIX: &str = " FROM STDIN WITH (format result)";
const SEND_SUFFIX: &str = " TO STDOUT WITH (format result)";
const BEGIN_PREFIX: &str = "BEGIN; SELECT assign_distributed_transaction_id(";
const FETCH_PREFIX: &str = "SELECT bytes FROM fetch_intermediate_results(ARRAY[";
const FETCH_ARRAY_END: &str = "]::text[], '";
const FETCH_SUFFIX: &str = ") bytes";

/// A command understood by the result service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start receiving copy data into the named result file
    ReceiveResult(ResultId),
    /// Stream the named result file back as copy data
    SendResult(ResultId),
    /// Open a transaction block bound to a distributed transaction
    BeginDistributed(DistributedTransactionId),
    /// Pull results from another node into the peer's namespace
    FetchResults {
        result_ids: Vec<ResultId>,
        source: NodeAddress,
    },
    Commit,
    Rollback,
}

impl Command {
    /// Command text as sent on the wire
    pub fn render(&self) -> String {
        match self {
            Command::ReceiveResult(id) => format!("COPY \"{}\"{}", id, RECEIVE_SUFFIX),
            Command::SendResult(id) => format!("COPY \"{}\"{}", id, SEND_SUFFIX),
            Command::BeginDistributed(txn) => format!(
                "{}{}, {}, '{}')",
                BEGIN_PREFIX,
                txn.initiator_node,
                txn.transaction_number,
                txn.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
            Command::FetchResults { result_ids, source } => {
                let ids: Vec<String> = result_ids.iter().map(|id| format!("'{}'", id)).collect();
                format!(
                    "{}{}{}{}', {}{}",
                    FETCH_PREFIX,
                    ids.join(","),
                    FETCH_ARRAY_END,
                    source.host(),
                    source.port(),
                    FETCH_SUFFIX
                )
            }
            Command::Commit => "COMMIT".to_string(),
            Command::Rollback => "ROLLBACK".to_string(),
        }
    }

    /// Parse command text received by the result service
    pub fn parse(text: &str) -> ExchangeResult<Command> {
        let text = text.trim();

        match text {
            "COMMIT" | "END" => return Ok(Command::Commit),
            "ROLLBACK" | "ABORT" => return Ok(Command::Rollback),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix("COPY \"") {
            return parse_copy(text, rest);
        }
        if let Some(rest) = text.strip_prefix(BEGIN_PREFIX) {
            return parse_begin(text, rest);
        }
        if let Some(rest) = text.strip_prefix(FETCH_PREFIX) {
            return parse_fetch(text, rest);
        }

        Err(unrecognized(text))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn unrecognized(text: &str) -> ExchangeError {
    ExchangeError::protocol_violation(format!("unrecognized command: {}", text))
}

fn parse_copy(text: &str, rest: &str) -> ExchangeResult<Command> {
    let (id, suffix) = rest.split_once('"').ok_or_else(|| unrecognized(text))?;
    let id = ResultId::new(id)?;
    match suffix {
        RECEIVE_SUFFIX => Ok(Command::ReceiveResult(id)),
        SEND_SUFFIX => Ok(Command::SendResult(id)),
        _ => Err(unrecognized(text)),
    }
}

fn parse_begin(text: &str, rest: &str) -> ExchangeResult<Command> {
    let args = rest.strip_suffix(')').ok_or_else(|| unrecognized(text))?;
    let mut parts = args.splitn(3, ',').map(str::trim);

    let node = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| unrecognized(text))?;
    let number = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| unrecognized(text))?;
    let timestamp = parts
        .next()
        .and_then(|s| s.strip_prefix('\'')?.strip_suffix('\''))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .ok_or_else(|| unrecognized(text))?;

    Ok(Command::BeginDistributed(DistributedTransactionId::new(
        NodeId(node),
        number,
        timestamp.with_timezone(&Utc),
    )))
}

fn parse_fetch(text: &str, rest: &str) -> ExchangeResult<Command> {
    let (array, rest) = rest.split_once(FETCH_ARRAY_END).ok_or_else(|| unrecognized(text))?;
    let (host, rest) = rest.split_once("', ").ok_or_else(|| unrecognized(text))?;
    let port = rest
        .strip_suffix(FETCH_SUFFIX)
        .and_then(|p| p.trim().parse::<u16>().ok())
        .ok_or_else(|| unrecognized(text))?;

    let mut result_ids = Vec::new();
    for element in array.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let id = element
            .strip_prefix('\'')
            .and_then(|e| e.strip_suffix('\''))
            .ok_or_else(|| unrecognized(text))?;
        result_ids.push(ResultId::new(id)?);
    }

    Ok(Command::FetchResults {
        result_ids,
        source: NodeAddress::new(host, port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn id(s: &str) -> ResultId {
        ResultId::new(s).unwrap()
    }

    #[test]
    fn test_copy_commands() {
        let receive = Command::ReceiveResult(id("r_1"));
        assert_eq!(receive.render(), "COPY \"r_1\" FROM STDIN WITH (format result)");
        assert_eq!(Command::parse(&receive.render()).unwrap(), receive);

        let send = Command::SendResult(id("r_1"));
        assert_eq!(send.render(), "COPY \"r_1\" TO STDOUT WITH (format result)");
        assert_eq!(Command::parse(&send.render()).unwrap(), send);
    }

    #[test]
    fn test_empty_result_id_is_allowed() {
        let send = Command::SendResult(id(""));
        assert_eq!(Command::parse(&send.render()).unwrap(), send);
    }

    #[test]
    fn test_copy_with_invalid_id_rejected() {
        let err = Command::parse("COPY \"../x\" TO STDOUT WITH (format result)").unwrap_err();
        assert_eq!(err.code().code(), "AERO_RESULT_ID_INVALID");
    }

    #[test]
    fn test_begin_distributed() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let begin = Command::BeginDistributed(DistributedTransactionId::new(NodeId(4), 17, timestamp));
        assert_eq!(
            begin.render(),
            "BEGIN; SELECT assign_distributed_transaction_id(4, 17, '2024-05-06T07:08:09.000000Z')"
        );
        assert_eq!(Command::parse(&begin.render()).unwrap(), begin);
    }

    #[test]
    fn test_fetch_results() {
        let fetch = Command::FetchResults {
            result_ids: vec![id("a"), id("b")],
            source: NodeAddress::new("10.0.0.2", 5544),
        };
        assert_eq!(
            fetch.render(),
            "SELECT bytes FROM fetch_intermediate_results(ARRAY['a','b']::text[], '10.0.0.2', 5544) bytes"
        );
        assert_eq!(Command::parse(&fetch.render()).unwrap(), fetch);
    }

    #[test]
    fn test_transaction_end() {
        assert_eq!(Command::parse("COMMIT").unwrap(), Command::Commit);
        assert_eq!(Command::parse("END").unwrap(), Command::Commit);
        assert_eq!(Command::parse("ROLLBACK").unwrap(), Command::Rollback);
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("DROP TABLE results").unwrap_err();
        assert_eq!(err.code().code(), "AERO_PROTOCOL_VIOLATION");
    }
}
