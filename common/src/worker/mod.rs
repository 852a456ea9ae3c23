// Worker module for event consumption and dispatch

pub mod dispatcher;

pub use dispatcher::EventDispatcher;
