use std::io::BufRead;

use super::{RayJob, ResultSink, StreamPlan, StreamStats};
use crate::error::PipelineResult;
use crate::reader::{RayEvent, RayReader};

/// Evaluate each ray on the calling thread and deliver it immediately.
pub fn run_sequential<R, J, S>(
    reader: &mut RayReader<R>,
    job: &J,
    sink: &mut S,
    plan: &StreamPlan,
) -> PipelineResult<StreamStats>
where
    R: BufRead,
    J: RayJob,
    S: ResultSink<J::Output>,
{
    let mut stats = StreamStats::default();
    loop {
        match reader.next_event()? {
            RayEvent::Ray(ray) => {
                sink.deliver(job.run(&ray))?;
                stats.rays += 1;
                if plan.is_complete(stats.rays) {
                    break;
                }
            }
            RayEvent::Flush => {
                sink.flush()?;
                stats.flushes += 1;
            }
            RayEvent::EndOfInput => break,
        }
    }
    Ok(stats)
}
