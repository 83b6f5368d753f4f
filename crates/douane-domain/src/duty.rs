//! Import duty and customs value arithmetic
//!
//! The customs value (CAF, the French equivalent of CIF) is expressed in
//! dirhams. Duty, the parafiscal tax (TPF) and VAT are computed on top of it:
//!
//! ```text
//! duty     = caf × duty_rate
//! tpf      = caf × tpf_rate          (0.25 % unless overridden)
//! vat_base = caf + duty + tpf
//! vat      = vat_base × vat_rate
//! total    = duty + tpf + vat
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default parafiscal import tax rate, in percent
pub const DEFAULT_TPF_RATE: f64 = 0.25;

/// Round an amount to cents
fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Inputs of a duty computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxInput {
    /// Customs value in dirhams
    pub caf_mad: f64,

    /// Import duty rate, in percent
    pub duty_rate: f64,

    /// VAT rate, in percent
    pub vat_rate: f64,

    /// Parafiscal tax rate, in percent; [`DEFAULT_TPF_RATE`] when absent
    #[serde(default)]
    pub tpf_rate: Option<f64>,
}

/// Result of a duty computation, every amount in dirhams
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    /// Import duty
    pub duty: f64,

    /// Parafiscal import tax
    pub tpf: f64,

    /// Base on which VAT is levied
    pub vat_base: f64,

    /// Import VAT
    pub vat: f64,

    /// duty + tpf + vat
    pub total: f64,
}

/// Compute duty, TPF and VAT on a customs value
///
/// # Examples
///
/// ```
/// use douane_domain::{calculate_taxes, TaxInput};
///
/// let taxes = calculate_taxes(&TaxInput {
///     caf_mad: 100_000.0,
///     duty_rate: 25.0,
///     vat_rate: 20.0,
///     tpf_rate: None,
/// })
/// .unwrap();
/// assert_eq!(taxes.duty, 25_000.0);
/// assert_eq!(taxes.tpf, 250.0);
/// assert_eq!(taxes.vat_base, 125_250.0);
/// assert_eq!(taxes.vat, 25_050.0);
/// assert_eq!(taxes.total, 50_300.0);
/// ```
pub fn calculate_taxes(input: &TaxInput) -> Result<TaxBreakdown, String> {
    let tpf_rate = input.tpf_rate.unwrap_or(DEFAULT_TPF_RATE);

    if !input.caf_mad.is_finite() || input.caf_mad < 0.0 {
        return Err(format!("caf_mad must be a non-negative amount, got {}", input.caf_mad));
    }
    for (name, rate) in [
        ("duty_rate", input.duty_rate),
        ("vat_rate", input.vat_rate),
        ("tpf_rate", tpf_rate),
    ] {
        if !rate.is_finite() || !(0.0..=1000.0).contains(&rate) {
            return Err(format!("{} {} out of range [0, 1000]", name, rate));
        }
    }

    let duty = round_cents(input.caf_mad * input.duty_rate / 100.0);
    let tpf = round_cents(input.caf_mad * tpf_rate / 100.0);
    let vat_base = round_cents(input.caf_mad + duty + tpf);
    let vat = round_cents(vat_base * input.vat_rate / 100.0);
    let total = round_cents(duty + tpf + vat);

    Ok(TaxBreakdown {
        duty,
        tpf,
        vat_base,
        vat,
        total,
    })
}

/// Incoterms 2020 delivery terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterm {
    /// Ex works
    Exw,
    /// Free carrier
    Fca,
    /// Free alongside ship
    Fas,
    /// Free on board
    Fob,
    /// Cost and freight
    Cfr,
    /// Carriage paid to
    Cpt,
    /// Cost, insurance and freight
    Cif,
    /// Carriage and insurance paid to
    Cip,
    /// Delivered at place
    Dap,
    /// Delivered at place unloaded
    Dpu,
    /// Delivered duty paid
    Ddp,
}

impl Incoterm {
    /// Get the incoterm code
    pub fn as_str(&self) -> &'static str {
        match self {
            Incoterm::Exw => "EXW",
            Incoterm::Fca => "FCA",
            Incoterm::Fas => "FAS",
            Incoterm::Fob => "FOB",
            Incoterm::Cfr => "CFR",
            Incoterm::Cpt => "CPT",
            Incoterm::Cif => "CIF",
            Incoterm::Cip => "CIP",
            Incoterm::Dap => "DAP",
            Incoterm::Dpu => "DPU",
            Incoterm::Ddp => "DDP",
        }
    }

    /// Parse an incoterm code, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "EXW" => Some(Incoterm::Exw),
            "FCA" => Some(Incoterm::Fca),
            "FAS" => Some(Incoterm::Fas),
            "FOB" => Some(Incoterm::Fob),
            "CFR" | "CNF" => Some(Incoterm::Cfr),
            "CPT" => Some(Incoterm::Cpt),
            "CIF" => Some(Incoterm::Cif),
            "CIP" => Some(Incoterm::Cip),
            "DAP" => Some(Incoterm::Dap),
            "DPU" => Some(Incoterm::Dpu),
            "DDP" => Some(Incoterm::Ddp),
            _ => None,
        }
    }

    /// Whether the invoice value already includes main carriage
    pub fn includes_freight(&self) -> bool {
        !matches!(self, Incoterm::Exw | Incoterm::Fca | Incoterm::Fas | Incoterm::Fob)
    }

    /// Whether the invoice value already includes insurance
    pub fn includes_insurance(&self) -> bool {
        matches!(
            self,
            Incoterm::Cif | Incoterm::Cip | Incoterm::Dap | Incoterm::Dpu | Incoterm::Ddp
        )
    }
}

impl fmt::Display for Incoterm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of a customs value computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafInput {
    /// Invoice value in `currency`
    pub value: f64,

    /// ISO currency code of the invoice
    pub currency: String,

    /// Delivery term of the invoice
    pub incoterm: Incoterm,

    /// Dirhams per unit of `currency`
    pub exchange_rate: f64,

    /// Freight cost in `currency`, added when the incoterm excludes it
    #[serde(default)]
    pub freight: Option<f64>,

    /// Insurance cost in `currency`, added when the incoterm excludes it
    #[serde(default)]
    pub insurance: Option<f64>,
}

/// Result of a customs value computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafBreakdown {
    /// CIF-equivalent value in the invoice currency
    pub caf_foreign: f64,

    /// Customs value in dirhams, rounded up to the dirham
    pub caf_mad: f64,

    /// Freight added to reach the CIF value
    pub freight_added: f64,

    /// Insurance added to reach the CIF value
    pub insurance_added: f64,
}

/// Convert an invoice value to a customs value in dirhams
///
/// # Examples
///
/// ```
/// use douane_domain::{calculate_caf, CafInput, Incoterm};
///
/// let caf = calculate_caf(&CafInput {
///     value: 10_000.0,
///     currency: "EUR".to_string(),
///     incoterm: Incoterm::Cif,
///     exchange_rate: 10.85,
///     freight: None,
///     insurance: None,
/// })
/// .unwrap();
/// assert_eq!(caf.caf_mad, 108_500.0);
/// ```
pub fn calculate_caf(input: &CafInput) -> Result<CafBreakdown, String> {
    if !input.value.is_finite() || input.value < 0.0 {
        return Err(format!("value must be a non-negative amount, got {}", input.value));
    }

    let exchange_rate = if input.currency.trim().eq_ignore_ascii_case("MAD") {
        1.0
    } else {
        input.exchange_rate
    };
    if !exchange_rate.is_finite() || exchange_rate <= 0.0 {
        return Err(format!("exchange_rate must be positive, got {}", exchange_rate));
    }

    let freight_added = if input.incoterm.includes_freight() {
        0.0
    } else {
        input.freight.unwrap_or(0.0)
    };
    let insurance_added = if input.incoterm.includes_insurance() {
        0.0
    } else {
        input.insurance.unwrap_or(0.0)
    };
    if freight_added < 0.0 || insurance_added < 0.0 {
        return Err("freight and insurance must be non-negative".to_string());
    }

    let caf_foreign = input.value + freight_added + insurance_added;
    // Round to cents first so float noise like 108500.00000000001 does not ceil to 108501
    let caf_mad = round_cents(caf_foreign * exchange_rate).ceil();

    Ok(CafBreakdown {
        caf_foreign,
        caf_mad,
        freight_added,
        insurance_added,
    })
}
