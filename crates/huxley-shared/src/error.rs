use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame payload of {len} bytes exceeds the {max} byte cap")]
    Oversized { len: usize, max: usize },
}
