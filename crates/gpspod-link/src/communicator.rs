use gpspod_frame::{Reply, Request};

use crate::error::Result;

/// One outstanding request at a time: `write`, then `read`.
pub trait Communicator {
    /// Send a request. Fails with `OutOfOrder` while a reply is outstanding.
    fn write(&mut self, request: &Request) -> Result<()>;

    /// Wait for the reply to the outstanding request.
    fn read(&mut self) -> Result<Reply>;

    fn exchange(&mut self, request: &Request) -> Result<Reply> {
        self.write(request)?;
        self.read()
    }
}

impl<C: Communicator + ?Sized> Communicator for &mut C {
    fn write(&mut self, request: &Request) -> Result<()> {
        (**self).write(request)
    }

    fn read(&mut self) -> Result<Reply> {
        (**self).read()
    }
}

impl<C: Communicator + ?Sized> Communicator for Box<C> {
    fn write(&mut self, request: &Request) -> Result<()> {
        (**self).write(request)
    }

    fn read(&mut self) -> Result<Reply> {
        (**self).read()
    }
}
