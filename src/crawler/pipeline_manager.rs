//! Runs requests and responses through the installed pipeline stages.
//!
//! The stage list is fixed once the engine is set up. Requests visit stages in
//! declared order. Responses visit them in reverse order when the pipeline is
//! symmetric, otherwise in declared order too.
//!
//! Stage faults are returned as-is; isolating them is the engine's job.

use crate::error::CrawlError;
use crate::pipeline::{
    PipelineStage, RequestAction, RequestOutcome, ResponseAction, ResponseOutcome,
};
use crate::request::Request;
use crate::response::Response;
use tracing::trace;

pub struct PipelineManager {
    stages: Vec<Box<dyn PipelineStage>>,
    symmetric: bool,
}

impl PipelineManager {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>, symmetric: bool) -> Self {
        Self { stages, symmetric }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the installed stages, in declared order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Processes a request through all stages in declared order.
    pub fn process_request(&mut self, request: Request) -> Result<RequestOutcome, CrawlError> {
        let mut current_request = request;

        for stage in self.stages.iter_mut() {
            match stage.process_request(current_request)? {
                RequestAction::Continue(req) => {
                    current_request = req;
                }
                RequestAction::Replace(req) => {
                    trace!("Stage '{}' replaced request with {}", stage.name(), req.url);
                    current_request = req;
                }
                RequestAction::ShortCircuit(response) => {
                    trace!(
                        "Stage '{}' short-circuited with response for {}",
                        stage.name(),
                        response.url
                    );
                    return Ok(RequestOutcome::Respond(response));
                }
                RequestAction::Drop => {
                    return Ok(RequestOutcome::Dropped {
                        stage: stage.name().to_string(),
                    });
                }
            }
        }

        Ok(RequestOutcome::Schedule(current_request))
    }

    /// Processes a response through all stages, reversed when symmetric.
    pub fn process_response(&mut self, response: Response) -> Result<ResponseOutcome, CrawlError> {
        let mut current_response = response;

        let stages: Box<dyn Iterator<Item = &mut Box<dyn PipelineStage>> + '_> = if self.symmetric
        {
            Box::new(self.stages.iter_mut().rev())
        } else {
            Box::new(self.stages.iter_mut())
        };

        for stage in stages {
            match stage.process_response(current_response)? {
                ResponseAction::Continue(res) => {
                    current_response = res;
                }
                ResponseAction::Replace(res) => {
                    trace!("Stage '{}' replaced response for {}", stage.name(), res.url);
                    current_response = res;
                }
                ResponseAction::Reschedule(request) => {
                    trace!("Stage '{}' rescheduled {}", stage.name(), request.url);
                    return Ok(ResponseOutcome::Reschedule(request));
                }
                ResponseAction::Drop => {
                    return Ok(ResponseOutcome::Dropped {
                        stage: stage.name().to_string(),
                    });
                }
            }
        }

        Ok(ResponseOutcome::Deliver(current_response))
    }
}
