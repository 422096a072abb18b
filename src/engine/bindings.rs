use rhai::{Dynamic, Engine};

use super::api;
use super::runtime::RuntimeHandle;

pub(super) fn register_all(engine: &mut Engine, runtime: RuntimeHandle) {
    engine.set_default_tag(Dynamic::from(runtime));
    api::register(engine);
}
