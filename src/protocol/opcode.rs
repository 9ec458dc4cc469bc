//! Worker operation codes.
//!
//! The daemon protocol numbers its operations 0 through 46, including codes
//! that only older clients still send. Only a handful are implemented by this
//! worker; the rest are known by name so errors can say what was asked for.

use std::fmt;

macro_rules! worker_ops {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// Every operation code defined by the protocol
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum WorkerOp {
            $($name),+
        }

        impl WorkerOp {
            /// All known operations in code order
            pub const ALL: &'static [WorkerOp] = &[$(WorkerOp::$name),+];

            /// Map a wire value to an operation
            pub fn from_code(code: u64) -> Option<Self> {
                match code {
                    $($code => Some(WorkerOp::$name),)+
                    _ => None,
                }
            }

            /// Wire value of this operation
            pub fn code(self) -> u64 {
                match self {
                    $(WorkerOp::$name => $code),+
                }
            }

            /// Protocol name of this operation
            pub fn name(self) -> &'static str {
                match self {
                    $(WorkerOp::$name => stringify!($name)),+
                }
            }
        }
    };
}

worker_ops! {
    QuitObsolete = 0,
    IsValidPath = 1,
    QuerySubstitutesObsolete = 2,
    QuerySubstitutes = 3,
    QueryPathHashObsolete = 4,
    QueryReferencesObsolete = 5,
    QueryReferrers = 6,
    AddToStore = 7,
    AddTextToStore = 8,
    BuildPaths = 9,
    EnsurePath = 10,
    AddTempRoot = 11,
    AddIndirectRoot = 12,
    SyncWithGC = 13,
    FindRoots = 14,
    CollectGarbageObsolete = 15,
    ExportPathObsolete = 16,
    ImportPathObsolete = 17,
    QueryDeriverObsolete = 18,
    SetOptions = 19,
    CollectGarbage = 20,
    QuerySubstitutablePathInfo = 21,
    QueryDerivationOutputsObsolete = 22,
    QueryAllValidPaths = 23,
    QueryFailedPaths = 24,
    ClearFailedPaths = 25,
    QueryPathInfo = 26,
    ImportPathsObsolete = 27,
    QueryDerivationOutputNamesObsolete = 28,
    QueryPathFromHashPart = 29,
    QuerySubstitutablePathInfos = 30,
    QueryValidPaths = 31,
    QuerySubstitutablePaths = 32,
    QueryValidDerivers = 33,
    OptimiseStore = 34,
    VerifyStore = 35,
    BuildDerivation = 36,
    AddSignatures = 37,
    NarFromPath = 38,
    AddToStoreNar = 39,
    QueryMissing = 40,
    QueryDerivationOutputMap = 41,
    RegisterDrvOutput = 42,
    QueryRealisation = 43,
    AddMultipleToStore = 44,
    AddBuildLog = 45,
    BuildPathsWithResults = 46,
}

impl fmt::Display for WorkerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Human-readable name for any wire value, known or not.
pub fn describe(code: u64) -> String {
    match WorkerOp::from_code(code) {
        Some(op) => op.name().to_string(),
        None => format!("Unknown WorkerOperation({code})"),
    }
}
