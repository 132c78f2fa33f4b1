// Error codes follow the gRPC status code names so faults from every crate in
// the workspace can be classified and mapped to a process exit status in one
// place. https://grpc.github.io/grpc/core/md_doc_statuscodes.html
use std::error::Error;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // UNKNOWN indicates an unknown error.
    Unknown = 2,
    // INVALID_ARGUMENT indicates a missing or invalid run parameter.
    InvalidArgument = 3,
    // NOT_FOUND means a named input file could not be opened.
    NotFound = 5,
    // FAILED_PRECONDITION indicates inputs that are individually valid but disagree with each other.
    FailedPrecondition = 9,
    // OUT_OF_RANGE means an identifier fell outside the table it indexes.
    OutOfRange = 11,
    // INTERNAL errors are internal errors, including faults raised by the index engine.
    Internal = 13,
    // DATA_LOSS indicates malformed or truncated content inside an input file.
    DataLoss = 15,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "ConfigurationFault",
            ErrorCodes::NotFound => "FileAccessFault",
            ErrorCodes::DataLoss => "FormatFault",
            ErrorCodes::FailedPrecondition => "ConsistencyFault",
            ErrorCodes::OutOfRange => "OutOfRangeFault",
            ErrorCodes::Internal => "EngineFault",
            _ => "BenchFault",
        }
    }

    /// Process exit status for a run that aborted with this code. Never zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCodes::Success => 0,
            code => *code as i32,
        }
    }
}

pub trait BenchError: Error + Send {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn BenchError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Error for Box<dyn BenchError> {}

impl BenchError for Box<dyn BenchError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }
}

impl BenchError for std::io::Error {
    fn code(&self) -> ErrorCodes {
        match self.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorCodes::NotFound
            }
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                ErrorCodes::DataLoss
            }
            _ => ErrorCodes::Unknown,
        }
    }
}
