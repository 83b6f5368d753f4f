//! Taxes and CAF command implementations.

use crate::cli::{CafArgs, TaxesArgs};
use crate::error::{CliError, Result};
use crate::output::Formatter;
use douane_domain::{calculate_caf, calculate_taxes, CafInput, TaxInput};

/// Execute the taxes command.
pub fn execute_taxes(args: TaxesArgs, formatter: &Formatter) -> Result<()> {
    let taxes = calculate_taxes(&TaxInput {
        caf_mad: args.caf_mad,
        duty_rate: args.duty_rate,
        vat_rate: args.vat_rate,
        tpf_rate: args.tpf_rate,
    })
    .map_err(CliError::InvalidInput)?;

    println!("{}", formatter.format_taxes(&taxes)?);
    Ok(())
}

/// Execute the caf command.
pub fn execute_caf(args: CafArgs, formatter: &Formatter) -> Result<()> {
    let caf = calculate_caf(&CafInput {
        value: args.value,
        currency: args.currency,
        incoterm: args.incoterm,
        exchange_rate: args.exchange_rate,
        freight: args.freight,
        insurance: args.insurance,
    })
    .map_err(CliError::InvalidInput)?;

    println!("{}", formatter.format_caf(&caf)?);
    Ok(())
}
