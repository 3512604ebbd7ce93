use std::str::SplitWhitespace;

use log::warn;
use thiserror::Error;

use crate::commons::{Addr, ProcRequest, Protocol, NUM_CACHES};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed core id '{0}'")]
    BadCoreId(String),

    #[error("malformed address '{0}'")]
    BadAddress(String),
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// One parsed step of the trace.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceEvent {
    Access {
        core: usize,
        op: ProcRequest,
        addr: Addr,
    },
    /// A core id outside [0, NUM_CACHES); the driver prints the
    /// diagnostic and stops.
    CoreOutOfRange(i64),
    /// The `-1` terminator, or input exhausted mid-record.
    End,
}

/// Tokenizing reader over a whitespace-separated trace.
///
/// The trace is a flat token stream: newlines carry no meaning, so a
/// record may span lines. Records with an op char other than `r`/`w`
/// are skipped after consuming their address token.
pub struct TraceReader<'a> {
    tokens: SplitWhitespace<'a>,
}

impl<'a> TraceReader<'a> {
    pub fn new(input: &'a str) -> Self {
        TraceReader {
            tokens: input.split_whitespace(),
        }
    }

    /// Reads the leading protocol name. `None` means the name is
    /// missing or not one of the five known protocols; the run then
    /// terminates without output.
    pub fn read_protocol(&mut self) -> Option<Protocol> {
        let token = self.tokens.next()?;
        match token.parse::<Protocol>() {
            Ok(protocol) => Some(protocol),
            Err(()) => {
                warn!("unknown protocol name '{token}'");
                None
            }
        }
    }

    pub fn next_event(&mut self) -> Result<TraceEvent> {
        loop {
            let Some(core_token) = self.tokens.next() else {
                return Ok(TraceEvent::End);
            };
            let core: i64 = core_token
                .parse()
                .map_err(|_| TraceError::BadCoreId(core_token.to_string()))?;
            if core == -1 {
                return Ok(TraceEvent::End);
            }

            let Some(op_token) = self.tokens.next() else {
                return Ok(TraceEvent::End);
            };
            let Some(addr_token) = self.tokens.next() else {
                return Ok(TraceEvent::End);
            };

            if core < 0 || core as usize >= NUM_CACHES {
                return Ok(TraceEvent::CoreOutOfRange(core));
            }

            let op = match op_token {
                "r" => ProcRequest::Read,
                "w" => ProcRequest::Write,
                other => {
                    warn!("skipping record with unknown op '{other}'");
                    continue;
                }
            };

            let raw = addr_token.trim_start_matches("0x");
            let addr = u64::from_str_radix(raw, 16)
                .map_err(|_| TraceError::BadAddress(addr_token.to_string()))?;
            return Ok(TraceEvent::Access {
                core: core as usize,
                op,
                addr: Addr(addr),
            });
        }
    }
}
