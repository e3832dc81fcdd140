//! Asynchronous query objects.
//!
//! A query wraps one backend query handle in the D3D9 issue/poll protocol:
//!
//! ```text
//!   FRESH --Issue(BEGIN)--> RUNNING --Issue(END)--> ENDED
//!                              ^                      |
//!                              +-----Issue(BEGIN)-----+   (non-instant)
//! ```
//!
//! "Instant" kinds (event, timestamp, ...) have no begin/end bracket;
//! BEGIN on them succeeds without doing anything. Polling a RUNNING query
//! is not an error; it reports no data yet. Polling a FRESH query
//! implicitly ends it and blocks for the result, because the caller never
//! finished the query but still expects a deterministic answer.

use std::sync::{Arc, Mutex};

use novem_pipe::{PipeQueryType, QueryCaps, QueryHandle, QueryResult};
use tracing::debug;

use crate::abi::QueryType;
use crate::context::Context;
use crate::error::{user_assert, D3dError, D3dResult};
use crate::unknown::{iid, InitialOwner, ObjectCore, Tag, Unknown};

/// `Issue` flag bits, in their D3DISSUE encoding.
pub const ISSUE_END: u32 = 1 << 0;
pub const ISSUE_BEGIN: u32 = 1 << 1;

/// Advertised tick rate of the timestamp clock. The backend reports
/// timestamps in nanoseconds, so the frequency is that clock's rate rather
/// than anything hardware-specific.
pub const TIMESTAMP_FREQUENCY: u64 = 1_000_000_000;

/// Flags accepted by [`Query9::get_data`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetDataFlags {
    /// Force the backend to make progress instead of merely polling.
    pub flush: bool,
}

/// Outcome of a poll. `NotReady` is a successful call, matching the
/// caller's retry loop; only contract violations are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GetData {
    Ready,
    NotReady,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LifeCycle {
    Fresh,
    Running,
    Ended,
}

#[derive(Debug)]
struct QueryInner {
    life: LifeCycle,
    /// Outstanding begin/end pairs; meaningful while ends may still be in
    /// flight on the command thread.
    counter: u32,
}

#[derive(Debug)]
pub struct Query9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    kind: QueryType,
    /// `None` for kinds answered without backend involvement.
    handle: Option<QueryHandle>,
    instant: bool,
    result_size: usize,
    inner: Mutex<QueryInner>,
}

fn pipe_query_type(kind: QueryType) -> Option<PipeQueryType> {
    match kind {
        QueryType::Event => Some(PipeQueryType::Event),
        QueryType::Occlusion => Some(PipeQueryType::Occlusion),
        QueryType::Timestamp => Some(PipeQueryType::Timestamp),
        QueryType::TimestampDisjoint | QueryType::TimestampFreq => {
            Some(PipeQueryType::TimestampDisjoint)
        }
        QueryType::VertexStats => Some(PipeQueryType::PipelineStatistics),
        QueryType::VCache => None,
    }
}

fn required_caps(kind: QueryType) -> QueryCaps {
    match kind {
        QueryType::Event => QueryCaps::EVENT,
        QueryType::Occlusion => QueryCaps::OCCLUSION,
        QueryType::Timestamp | QueryType::TimestampDisjoint | QueryType::TimestampFreq => {
            QueryCaps::TIMESTAMP
        }
        QueryType::VertexStats => QueryCaps::PIPELINE_STATISTICS,
        QueryType::VCache => QueryCaps::empty(),
    }
}

fn result_size(kind: QueryType) -> usize {
    match kind {
        QueryType::Event | QueryType::TimestampDisjoint | QueryType::Occlusion => 4,
        QueryType::Timestamp | QueryType::TimestampFreq | QueryType::VertexStats => 8,
        // D3DDEVINFO_VCACHE: four DWORDs.
        QueryType::VCache => 16,
    }
}

fn is_instant(kind: QueryType) -> bool {
    !matches!(
        kind,
        QueryType::Occlusion | QueryType::TimestampDisjoint | QueryType::VertexStats
    )
}

impl Query9 {
    /// Checks support without creating anything, for callers probing
    /// capability (`CreateQuery` with a null out pointer in the original
    /// API).
    pub fn supported(ctx: &Context, kind: QueryType) -> bool {
        ctx.caps().queries.contains(required_caps(kind))
    }

    pub(crate) fn new(ctx: Arc<Context>, kind: QueryType) -> D3dResult<Arc<Self>> {
        if !Self::supported(&ctx, kind) {
            return Err(D3dError::NotAvailable);
        }
        let handle = match pipe_query_type(kind) {
            Some(pipe_kind) => Some(
                ctx.create_query(pipe_kind)
                    .map_err(|_| D3dError::NotAvailable)?,
            ),
            None => None,
        };
        debug!(?kind, ?handle, "query created");
        Ok(Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            ctx,
            kind,
            handle,
            instant: is_instant(kind),
            result_size: result_size(kind),
            inner: Mutex::new(QueryInner {
                life: LifeCycle::Fresh,
                counter: 0,
            }),
        }))
    }

    pub fn query_type(&self) -> QueryType {
        self.kind
    }

    /// Bytes `get_data` wants to write for this kind.
    pub fn data_size(&self) -> usize {
        self.result_size
    }

    /// `Issue(flags)`. Flags must be exactly BEGIN, END, or 0 (0 behaves
    /// as END).
    pub fn issue(&self, flags: u32) -> D3dResult<()> {
        user_assert!(
            flags == ISSUE_BEGIN || flags == ISSUE_END || flags == 0,
            D3dError::InvalidCall
        );

        let mut inner = self.inner.lock().unwrap();
        if flags == ISSUE_BEGIN {
            if self.instant {
                // No begin/end pairing concept; accepted and ignored.
                return Ok(());
            }
            let handle = self.handle.expect("bracketed query without backend handle");
            if inner.life == LifeCycle::Running {
                self.ctx.query_end(handle);
                inner.counter = inner.counter.saturating_sub(1);
            }
            self.ctx.query_begin(handle);
            inner.counter += 1;
            inner.life = LifeCycle::Running;
            return Ok(());
        }

        // END, or 0 which the runtime has always treated as END.
        if let Some(handle) = self.handle {
            if !self.instant && inner.life == LifeCycle::Fresh {
                // Ending a never-begun bracket query: open and close an
                // empty interval so the backend has something to report.
                self.ctx.query_begin(handle);
                inner.counter += 1;
            }
            self.ctx.query_end(handle);
            inner.counter = inner.counter.saturating_sub(1);
        }
        inner.life = LifeCycle::Ended;
        Ok(())
    }

    /// Polls the result. `out` may be empty (poll-only); otherwise it must
    /// hold at least [`data_size`](Self::data_size) bytes.
    pub fn get_data(&self, out: &mut [u8], flags: GetDataFlags) -> D3dResult<GetData> {
        user_assert!(
            out.is_empty() || out.len() >= self.result_size,
            D3dError::InvalidCall
        );

        let life = self.inner.lock().unwrap().life;
        let mut wait = false;
        match life {
            LifeCycle::Running => return Ok(GetData::NotReady),
            LifeCycle::Fresh => {
                // The caller never issued END but expects an answer; end
                // now and block until the backend delivers.
                self.issue(ISSUE_END)?;
                wait = true;
            }
            LifeCycle::Ended => {}
        }

        let Some(handle) = self.handle else {
            // Backend-less kinds answer immediately.
            self.write_result(out, None);
            return Ok(GetData::Ready);
        };

        match self.ctx.query_result(handle, wait, flags.flush) {
            Ok(Some(result)) => {
                self.write_result(out, Some(result));
                Ok(GetData::Ready)
            }
            Ok(None) => Ok(GetData::NotReady),
            Err(_) => Err(D3dError::InvalidCall),
        }
    }

    fn write_result(&self, out: &mut [u8], result: Option<QueryResult>) {
        if out.is_empty() {
            return;
        }
        let out = &mut out[..self.result_size];
        match (self.kind, result) {
            (QueryType::Event, _) => out.copy_from_slice(&1u32.to_le_bytes()),
            (QueryType::Occlusion, Some(QueryResult::Occlusion(samples))) => {
                // Backend counters are 64-bit; the API field is a DWORD.
                out.copy_from_slice(&(samples as u32).to_le_bytes());
            }
            (QueryType::Timestamp, Some(QueryResult::Timestamp(ns))) => {
                out.copy_from_slice(&ns.to_le_bytes());
            }
            (QueryType::TimestampDisjoint, Some(QueryResult::TimestampDisjoint(disjoint))) => {
                out.copy_from_slice(&u32::from(disjoint).to_le_bytes());
            }
            (QueryType::TimestampFreq, _) => {
                out.copy_from_slice(&TIMESTAMP_FREQUENCY.to_le_bytes());
            }
            (
                QueryType::VertexStats,
                Some(QueryResult::PipelineStatistics {
                    primitives_generated,
                    ..
                }),
            ) => {
                out[..4].copy_from_slice(&(primitives_generated as u32).to_le_bytes());
                // Extra clipping-generated triangles: the backend does not
                // count these separately.
                out[4..8].copy_from_slice(&0u32.to_le_bytes());
            }
            (QueryType::VCache, _) => out.fill(0),
            (kind, result) => {
                debug!(?kind, ?result, "mismatched query result payload");
                out.fill(0);
            }
        }
    }
}

impl Unknown for Query9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::QUERY]
    }

    fn on_destroy(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(handle) = self.handle {
            if inner.life == LifeCycle::Running {
                self.ctx.query_end(handle);
            }
            self.ctx.destroy_query(handle);
        }
    }
}
