//! Send/Sync guarantees for the public types.

use faultline::{
    Dispatcher, EventBus, HttpTransport, InternalEvent, Payload, PayloadQueue, Reporter,
    ReporterConfig,
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn engine_types_are_send_sync() {
    assert_impl_all!(Dispatcher: Send, Sync);
    assert_impl_all!(PayloadQueue: Send, Sync);
    assert_impl_all!(EventBus: Send, Sync);
    assert_impl_all!(HttpTransport: Send, Sync);
}

#[rstest]
fn value_types_are_send_sync() {
    assert_impl_all!(Payload: Send, Sync);
    assert_impl_all!(InternalEvent: Send, Sync);
    assert_impl_all!(ReporterConfig: Send, Sync);
    assert_impl_all!(Reporter: Send, Sync);
}
