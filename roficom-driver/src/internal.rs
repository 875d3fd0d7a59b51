/// Private interfaces for the RoFICoM stack
///
/// Drivers should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use crate::link::WriteResult;

pub trait DynamicRx {
    fn on_received(&self, data: &[u8]);
    fn on_transaction_end(&self);
}

pub trait DynamicTx<B> {
    fn on_write_complete(&self, buffer: B, result: WriteResult);
}

pub trait DynamicLink<B>: DynamicRx + DynamicTx<B> {}
