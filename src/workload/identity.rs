use crate::*;

pub const DOC: &str = "Identity: echoes every record unchanged. Map only.";

pub fn map(kv: KeyValue) -> MapOutput {
    Ok(Box::new(std::iter::once(Ok(kv))))
}
