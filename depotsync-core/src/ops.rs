//! Registry of persistence entry points
//!
//! Every operation the persistence layer exposes is declared here together with
//! its [`OperationKind`]. Mutating operations trigger a copy-up after they
//! succeed; read-only operations never do. The kind is declared explicitly per
//! entry, so adding an operation forces a decision instead of inferring it from
//! the name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an operation changes the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ReadOnly,
    Mutating,
}

macro_rules! operations {
    ($($variant:ident => $name:literal, $kind:ident;)+) => {
        /// A named persistence entry point
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant,)+
        }

        impl Operation {
            /// Every registered operation
            pub const ALL: &'static [Operation] = &[$(Operation::$variant,)+];

            /// Wire name used by the UI layer
            pub fn name(&self) -> &'static str {
                match self {
                    $(Operation::$variant => $name,)+
                }
            }

            pub fn kind(&self) -> OperationKind {
                match self {
                    $(Operation::$variant => OperationKind::$kind,)+
                }
            }
        }
    };
}

operations! {
    // Session
    Login => "login", ReadOnly;
    Connect => "connect", ReadOnly;
    Disconnect => "disconnect", ReadOnly;
    GetDatabaseInfo => "getDatabaseInfo", ReadOnly;
    CreateUser => "createUser", Mutating;
    UpdateUser => "updateUser", Mutating;

    // Assets
    GetAssets => "getAssets", ReadOnly;
    GetAssetById => "getAssetById", ReadOnly;
    CreateAsset => "createAsset", Mutating;
    UpdateAsset => "updateAsset", Mutating;
    DeleteAsset => "deleteAsset", Mutating;

    // Sites
    GetSites => "getSites", ReadOnly;
    GetSiteTransactions => "getSiteTransactions", ReadOnly;
    CreateSite => "createSite", Mutating;
    UpdateSite => "updateSite", Mutating;
    DeleteSite => "deleteSite", Mutating;

    // People and vehicles
    GetEmployees => "getEmployees", ReadOnly;
    CreateEmployee => "createEmployee", Mutating;
    UpdateEmployee => "updateEmployee", Mutating;
    DeleteEmployee => "deleteEmployee", Mutating;
    GetVehicles => "getVehicles", ReadOnly;
    CreateVehicle => "createVehicle", Mutating;
    DeleteVehicle => "deleteVehicle", Mutating;

    // Waybills and returns
    GetWaybills => "getWaybills", ReadOnly;
    GetWaybillById => "getWaybillById", ReadOnly;
    CreateWaybill => "createWaybill", Mutating;
    UpdateWaybill => "updateWaybill", Mutating;
    DeleteWaybill => "deleteWaybill", Mutating;
    SendToSite => "sendToSite", Mutating;
    GetReturnBills => "getReturnBills", ReadOnly;
    CreateReturnBill => "createReturnBill", Mutating;
    ProcessReturn => "processReturn", Mutating;

    // Quick checkouts
    GetQuickCheckouts => "getQuickCheckouts", ReadOnly;
    CreateQuickCheckout => "createQuickCheckout", Mutating;
    UpdateQuickCheckout => "updateQuickCheckout", Mutating;

    // Activity log and settings
    GetActivities => "getActivities", ReadOnly;
    CreateActivity => "createActivity", Mutating;
    ClearActivities => "clearActivities", Mutating;
    GetCompanySettings => "getCompanySettings", ReadOnly;
    SaveCompanySettings => "saveCompanySettings", Mutating;
}

impl Operation {
    /// Look up an operation by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn is_mutating(&self) -> bool {
        self.kind() == OperationKind::Mutating
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
