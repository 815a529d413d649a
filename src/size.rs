use std::io;

use serde::Serialize;
use serde_json::json;

use crate::config::SizeLimits;
use crate::error::ToolError;

/// Which configured bound a value is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Parameter,
    Result,
    Resource,
    Message,
}

impl SizeLimit {
    /// Field name reported in the `InvalidParams` error.
    pub fn field(self) -> &'static str {
        match self {
            Self::Parameter => "parameters",
            Self::Result => "result",
            Self::Resource => "resource",
            Self::Message => "message",
        }
    }
}

/// Pure byte-size checks against the configured limits.
#[derive(Debug, Clone, Default)]
pub struct SizeValidator {
    limits: SizeLimits,
}

impl SizeValidator {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    pub fn max_bytes(&self, limit: SizeLimit) -> usize {
        match limit {
            SizeLimit::Parameter => self.limits.max_parameter_size,
            SizeLimit::Result => self.limits.max_result_size,
            SizeLimit::Resource => self.limits.max_resource_size,
            SizeLimit::Message => self.limits.max_message_size,
        }
    }

    /// Serialize `value` (compact JSON) and check it fits. Returns its size.
    pub fn check<T: Serialize + ?Sized>(
        &self,
        limit: SizeLimit,
        value: &T,
    ) -> Result<usize, ToolError> {
        let size = serialized_size(value)?;
        self.check_len(limit, size)?;
        Ok(size)
    }

    /// Check an already-known byte length.
    pub fn check_len(&self, limit: SizeLimit, size: usize) -> Result<(), ToolError> {
        let max = self.max_bytes(limit);
        if size > max {
            let field = limit.field();
            return Err(ToolError::invalid_params(
                format!("{field} size {size} bytes exceeds limit of {max} bytes"),
                vec![field.to_string()],
            )
            .with_detail(json!({ "field": field, "size": size, "limit": max })));
        }
        Ok(())
    }
}

/// Byte length of the compact JSON encoding, without building the string.
pub fn serialized_size<T: Serialize + ?Sized>(value: &T) -> Result<usize, ToolError> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, value)
        .map_err(|e| ToolError::internal_from("failed to serialize value", e))?;
    Ok(counter.0)
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
