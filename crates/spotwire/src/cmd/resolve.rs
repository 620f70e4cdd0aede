use spotwire_transport::AccessPointResolver;

use crate::cmd::ResolveArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_candidates, OutputFormat};

pub fn run(args: ResolveArgs, format: OutputFormat) -> CliResult<i32> {
    let candidates = args
        .ap
        .resolver()
        .resolve()
        .map_err(|err| transport_error("resolve failed", &err))?;
    print_candidates(&candidates, format);
    Ok(SUCCESS)
}
