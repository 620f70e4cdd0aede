use spotwire_mercury::{MercuryRequest, SessionConfig};

use crate::cmd::{parse_duration, GetArgs};
use crate::exit::{mercury_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: GetArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let session = args.session.open(SessionConfig {
        request_timeout: timeout,
        ..SessionConfig::default()
    })?;

    let mut request = MercuryRequest::new(args.method, &args.uri);
    for part in &args.parts {
        request = request.with_part(part.clone().into_bytes());
    }

    let result = session.execute(request, timeout);
    session.close();
    let response = result.map_err(|err| mercury_error("request failed", err))?;

    print_message(&response, "response", format);

    if args.fail_on_status && response.status_code >= 400 {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}
