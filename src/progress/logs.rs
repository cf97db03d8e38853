//! Log streams connecting process output to the progress channel

use crate::context::Context;
use crate::digest::Digest;
use crate::progress::{ProgressWriter, SolveStatus, Stream, VertexLog};
use chrono::Utc;

/// One side (stdout or stderr) of a process's output
///
/// Writes after `close` are dropped. Dropping the stream closes it.
#[derive(Debug)]
pub struct LogStream {
    writer: ProgressWriter,
    vertex: Option<Digest>,
    stream: Stream,
    closed: bool,
}

impl LogStream {
    fn new(ctx: &Context, stream: Stream) -> Self {
        Self {
            writer: ctx.progress().clone(),
            vertex: ctx.vertex().cloned(),
            stream,
            closed: false,
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.closed || data.is_empty() {
            return;
        }
        self.writer.write(SolveStatus::Log(VertexLog {
            vertex: self.vertex.clone(),
            stream: self.stream,
            timestamp: Utc::now(),
            data: data.to_vec(),
        }));
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stdout and stderr streams scoped to the vertex carried by `ctx`
pub fn new_log_streams(ctx: &Context) -> (LogStream, LogStream) {
    (
        LogStream::new(ctx, Stream::Stdout),
        LogStream::new(ctx, Stream::Stderr),
    )
}
