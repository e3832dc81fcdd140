//! Command-submission threading: the worker that drains the command queue.
//!
//! In threaded mode all backend work happens on one worker thread fed by an
//! mpsc channel, preserving per-device FIFO order. Synchronous operations
//! (resource creation, query polls, flushes) ride the same channel with a
//! rendezvous reply so they observe every previously submitted command.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use novem_pipe::{PipeError, PipeQueryType, QueryHandle, QueryResult, ResourceDesc, ResourceHandle};
use tracing::debug;

use super::cmd::ContextCmd;
use super::shadow::Executor;

pub(super) enum WorkerMsg {
    Cmd(ContextCmd),
    CreateResource {
        desc: ResourceDesc,
        reply: mpsc::Sender<Result<ResourceHandle, PipeError>>,
    },
    CreateQuery {
        kind: PipeQueryType,
        reply: mpsc::Sender<Result<QueryHandle, PipeError>>,
    },
    QueryResult {
        handle: QueryHandle,
        wait: bool,
        flush: bool,
        reply: mpsc::Sender<Result<Option<QueryResult>, PipeError>>,
    },
    Flush {
        reply: mpsc::Sender<()>,
    },
    Exit,
}

pub(super) struct CsmtWorker {
    tx: mpsc::Sender<WorkerMsg>,
    join: Option<JoinHandle<()>>,
}

impl CsmtWorker {
    pub fn spawn(mut executor: Executor) -> Self {
        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let join = thread::Builder::new()
            .name("csmt-worker".into())
            .spawn(move || {
                debug!("csmt worker spawned");
                while let Ok(msg) = rx.recv() {
                    match msg {
                        WorkerMsg::Cmd(cmd) => executor.execute(cmd),
                        WorkerMsg::CreateResource { desc, reply } => {
                            let _ = reply.send(executor.create_resource(&desc));
                        }
                        WorkerMsg::CreateQuery { kind, reply } => {
                            let _ = reply.send(executor.create_query(kind));
                        }
                        WorkerMsg::QueryResult {
                            handle,
                            wait,
                            flush,
                            reply,
                        } => {
                            let _ = reply.send(executor.query_result(handle, wait, flush));
                        }
                        WorkerMsg::Flush { reply } => {
                            executor.flush();
                            let _ = reply.send(());
                        }
                        WorkerMsg::Exit => break,
                    }
                }
                debug!("csmt worker exiting");
            })
            .expect("failed to spawn csmt worker thread");
        Self {
            tx,
            join: Some(join),
        }
    }

    pub fn send(&self, msg: WorkerMsg) {
        // A dead worker means the backend already tore down; commands past
        // that point are no-ops by definition.
        let _ = self.tx.send(msg);
    }
}

impl Drop for CsmtWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Exit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
