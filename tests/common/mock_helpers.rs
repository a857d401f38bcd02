//! Mock construction helpers

use filterchain_rs::graph::{Graph, TapId};
use filterchain_rs::stage::Stage;
use filterchain_rs::ControlMessage;
use mockall::mock;

// Stage double with programmable apply/revert results.
mock! {
    pub Stage {}

    impl Stage for Stage {
        fn name(&self) -> &str;
        fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId>;
        fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId>;
        fn handle_message(&self, message: &ControlMessage) -> bool;
    }
}

/// A mock that splices nothing: `apply` hands back the tap it was given.
pub fn passthrough_mock(name: &str) -> MockStage {
    let mut mock = MockStage::new();
    mock.expect_name().return_const(name.to_string());
    mock.expect_apply().returning(|_, tap| Some(tap));
    mock.expect_handle_message().return_const(false);
    mock
}
