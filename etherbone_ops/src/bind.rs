use etherbone_host::{Access, NetworkTarget};

use crate::Error;
use crate::params::{ParamAccess, ParamConfig, ParamFields};

/// Fill the caller supplied fields of `template` and return the concrete access.
///
/// The caller must give exactly the fields `config` requires. Mask and offset are picked from the
/// config lists by index, never taken raw.
pub fn bind(
    template: &Access,
    config: &ParamConfig,
    params: &ParamAccess,
) -> Result<Access, Error> {
    if params.given() != config.required {
        return Err(Error::ParameterMismatch {
            index: 0,
            required: config.required,
            given: params.given(),
        });
    }
    let mut access = template.clone();
    let required = config.required;
    if required.contains(ParamFields::NETADDRESS) {
        let target: NetworkTarget =
            params
                .net_address()
                .parse()
                .map_err(|e| Error::InvalidNetAddress {
                    address: params.net_address().to_string(),
                    reason: format!("{e}"),
                })?;
        access.target = target;
    }
    if required.contains(ParamFields::PORT) {
        access.target.port = params.port();
    }
    if required.contains(ParamFields::MASK) {
        access.mask = *config
            .masks
            .get(params.mask_index())
            .ok_or(Error::MaskIndexOutOfRange {
                index: 0,
                choice: params.mask_index(),
                len: config.masks.len(),
            })?;
    }
    if required.contains(ParamFields::OFFSET) {
        access.offset = *config
            .offsets
            .get(params.offset_index())
            .ok_or(Error::OffsetIndexOutOfRange {
                index: 0,
                choice: params.offset_index(),
                len: config.offsets.len(),
            })?;
    }
    if required.contains(ParamFields::VALUE) {
        access.value = params.value();
    }
    Ok(access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherbone_host::{AccessMode, Proto};

    fn template() -> Access {
        Access::new(0x100).with_mode(AccessMode::Write)
    }

    #[test]
    fn offset_by_index() {
        let config = ParamConfig::none().with_offsets(vec![0x10, 0x20, 0x30]);
        let mut params = ParamAccess::new();
        params.set_offset_index(1);
        let access = bind(&template(), &config, &params).unwrap();
        assert_eq!(access.offset, 0x20);
        assert_eq!(access.effective_address(), 0x120);
    }

    #[test]
    fn template_is_untouched() {
        let template = template();
        let config = ParamConfig::none()
            .require(ParamFields::VALUE)
            .with_masks(vec![0x1, 0x2]);
        let mut params = ParamAccess::new();
        params.set_value(0xAA).set_mask_index(1);
        let access = bind(&template, &config, &params).unwrap();
        assert_eq!((access.value, access.mask), (0xAA, 0x2));
        assert_eq!((template.value, template.mask), (0, 0));
    }

    #[test]
    fn network_target_and_port() {
        let config = ParamConfig::none().require(ParamFields::NETADDRESS | ParamFields::PORT);
        let mut params = ParamAccess::new();
        params.set_net_address("tcp/board7").set_port(5000);
        let access = bind(&template(), &config, &params).unwrap();
        assert_eq!(access.target.proto, Proto::Tcp);
        assert_eq!(access.target.host, "board7");
        assert_eq!(access.target.port, 5000);
    }

    #[test]
    fn missing_field_is_a_mismatch() {
        let config = ParamConfig::none()
            .require(ParamFields::NETADDRESS)
            .with_masks(vec![0x1]);
        let mut params = ParamAccess::new();
        params.set_net_address("udp/board7");
        assert_eq!(
            bind(&template(), &config, &params),
            Err(Error::ParameterMismatch {
                index: 0,
                required: ParamFields::NETADDRESS | ParamFields::MASK,
                given: ParamFields::NETADDRESS
            })
        );
    }

    #[test]
    fn extra_field_is_a_mismatch() {
        let mut params = ParamAccess::new();
        params.set_value(1);
        assert!(matches!(
            bind(&template(), &ParamConfig::none(), &params),
            Err(Error::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn index_out_of_range() {
        let config = ParamConfig::none().with_masks(vec![0x1, 0x2]);
        let mut params = ParamAccess::new();
        params.set_mask_index(2);
        assert_eq!(
            bind(&template(), &config, &params),
            Err(Error::MaskIndexOutOfRange {
                index: 0,
                choice: 2,
                len: 2
            })
        );
    }

    #[test]
    fn bad_net_address() {
        let config = ParamConfig::none().require(ParamFields::NETADDRESS);
        let mut params = ParamAccess::new();
        params.set_net_address("10.0.0.1");
        assert!(matches!(
            bind(&template(), &config, &params),
            Err(Error::InvalidNetAddress { .. })
        ));
    }
}
