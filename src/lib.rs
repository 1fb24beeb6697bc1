pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod schedule;

pub mod processing {
    pub mod color;
    pub mod layout;
    pub mod resize;
}

pub mod reactive {
    pub mod effect;
    pub mod signal;
}

pub mod render {
    pub mod drawing;
    pub mod surface;
}

pub mod tasks {
    pub mod canvas;
    pub mod share;
    pub mod share_target;
    pub mod slots;
}

pub use error::Error;
pub use tasks::canvas::CanvasState;
