/// A request shape the dispatch benchmarks run through the pipeline.
#[derive(Debug, Copy, Clone)]
pub struct DispatchCase {
    name: &'static str,
    uri: &'static str,
    handlers: usize,
}

impl DispatchCase {
    pub const fn new(name: &'static str, uri: &'static str, handlers: usize) -> Self {
        Self { name, uri, handlers }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    /// Handlers every customizer contributes per phase.
    pub fn handlers(&self) -> usize {
        self.handlers
    }
}

pub fn dispatch_cases() -> Vec<DispatchCase> {
    vec![
        DispatchCase::new("static_route", "/", 0),
        DispatchCase::new("path_params", "/users/42/orders/7", 0),
        DispatchCase::new("four_handlers", "/users/42/orders/7", 4),
        DispatchCase::new("sixteen_handlers", "/users/42/orders/7", 16),
        DispatchCase::new("no_route", "/missing/route", 4),
    ]
}
