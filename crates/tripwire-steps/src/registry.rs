use tripwire_core::catalog::StepCatalog;
use tripwire_core::error::Result;
use tripwire_core::step::Step;

use crate::builtin::{clock, compare, file, fork, log, message, template};

/// Add every built-in step kind to `catalog`.
pub fn register_builtins(catalog: &StepCatalog) -> Result<()> {
    catalog.register(&file::DESCRIPTOR, || -> Box<dyn Step> {
        Box::new(file::FileModified::default())
    })?;
    catalog.register(&message::AWAIT_DESCRIPTOR, || -> Box<dyn Step> {
        Box::new(message::AwaitMessage)
    })?;
    catalog.register(&compare::DESCRIPTOR, || -> Box<dyn Step> { Box::new(compare::Compare) })?;
    catalog.register(&message::SEND_DESCRIPTOR, || -> Box<dyn Step> {
        Box::new(message::SendMessage)
    })?;
    catalog.register(&log::DESCRIPTOR, || -> Box<dyn Step> { Box::new(log::Log) })?;
    catalog.register(&fork::DESCRIPTOR, || -> Box<dyn Step> { Box::new(fork::Fork) })?;
    catalog.register(&clock::DESCRIPTOR, || -> Box<dyn Step> { Box::new(clock::Clock) })?;
    catalog.register(&template::DESCRIPTOR, || -> Box<dyn Step> {
        Box::new(template::Template)
    })?;
    Ok(())
}
