//! Method surfaces of the three marketplace contracts.

#![allow(non_snake_case)]

use alloy::sol;

sol! {
    /// Meter registry: production/consumption totals and role grants.
    #[derive(Debug, PartialEq, Eq)]
    interface IDeviceRegistry {
        function ceo_address() external view returns (address);
        function device_index(address device) external view returns (
            uint256 whProduced,
            uint256 whConsumed,
            uint256 whAvailable,
            uint256 whDeficit,
            bool validConsumer,
            bool validProducer
        );
        function setCEO(address newCeo) external;
        function designateProducer(address producer) external;
        function designateConsumer(address consumer) external;
        function generateWattHours(uint256 wattHours) external;
        function consumeWattHours(uint256 wattHours) external;
    }
}

sol! {
    /// Energy-credit exchange: whitelisting and minting.
    #[derive(Debug, PartialEq, Eq)]
    interface IMicrogridExchange {
        event ValidationRequested(address indexed asset, uint256 wattHours);

        function owner() external view returns (address);
        function setOperatorsAgreement(address agreement) external;
        function whitelistAsset(address asset) external;
        function approveMint(address asset, uint256 amount) external;
        function requestValidation(uint256 wattHours) external;
        function balanceOf(address account) external view returns (uint256);
    }
}

sol! {
    /// Mediates which devices may reach the exchange.
    #[derive(Debug, PartialEq, Eq)]
    interface IOperatorsAgreement {
        function owner() external view returns (address);
        function setExchange(address exchange) external;
        function whitelistAsset(address asset) external;
        function generateKwh(uint256 kwh) external;
    }
}
