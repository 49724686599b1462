//! In-process transport
//!
//! Drives an [`IndexService`] directly, with the same session semantics as a
//! TCP connection: a failed request yields an error reply and closes the
//! session.

use mope_core::{Error, Request, Response, Transport};

use crate::service::IndexService;
use crate::store::TreeStore;

pub struct Loopback<'a, S> {
    service: &'a mut IndexService<S>,
    closed: bool,
}

impl<'a, S: TreeStore> Loopback<'a, S> {
    pub fn new(service: &'a mut IndexService<S>) -> Self {
        Self {
            service,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S: TreeStore> Transport for Loopback<'_, S> {
    async fn round_trip(&mut self, request: Request) -> mope_core::Result<Response> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        match self.service.handle(request) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.closed = true;
                Ok(Response::Error(self.service.recover(&e)))
            }
        }
    }
}
