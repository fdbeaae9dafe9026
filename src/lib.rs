pub mod api;

pub mod channel;

pub mod config;

pub mod errors;

pub mod history;

pub mod message {
    pub mod submit;
    pub mod update;
}

pub mod session;

#[cfg(test)]
mod testing;

pub mod verdict;
