//! Response writing: the writer itself, the two responders and the error handler.

pub mod failure;
pub mod stream;
pub mod unary;
mod writer;

pub use stream::StreamSummary;
pub use unary::UnaryReply;
pub use writer::{CallOutcome, ClientGone, PendingResponse, ResponseBody, ResponseHead, ResponseWriter};

use crate::context::CallContext;
use crate::dispatch::Reply;
use crate::error::Result;

/// Write the outcome of dispatch. Failures go through the error handler; nothing escapes.
pub async fn write_reply(reply: Result<Reply>, writer: &mut ResponseWriter, ctx: &CallContext) {
    match reply {
        Ok(Reply::Warmed) => {
            writer.finish();
            writer.set_outcome(CallOutcome::Warmed);
        }
        Ok(Reply::Unary(reply)) => unary::respond(reply, writer, ctx).await,
        Ok(Reply::Stream(session)) => {
            stream::respond(session, writer, ctx).await;
        }
        Err(err) => failure::respond(&err, writer, ctx).await,
    }
}
