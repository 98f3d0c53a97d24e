//! Calldata for QuoterV2 `quoteExactInputSingle` and Multicall3 `aggregate3`.

use crate::types::{EncodingError, QuoteRequest, MAX_FEE_TIER};
use alloy_primitives::{aliases::U24, Address, Bytes, U160, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }

    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
    }
}

pub use IMulticall3::Call3Result;

/// Encodes one exact-input single-hop quote with no price limit.
pub fn encode_quote_call(request: &QuoteRequest) -> Result<Bytes, EncodingError> {
    if request.fee_tier > MAX_FEE_TIER {
        return Err(EncodingError::FeeOutOfRange(request.fee_tier));
    }
    let params = IQuoterV2::QuoteExactInputSingleParams {
        tokenIn: request.token_in,
        tokenOut: request.token_out,
        amountIn: request.amount_in,
        fee: U24::from(request.fee_tier),
        sqrtPriceLimitX96: U160::ZERO,
    };
    Ok(IQuoterV2::quoteExactInputSingleCall { params }.abi_encode().into())
}

/// Decodes `amountOut` from a quoter return payload. Quoters that return a
/// bare `uint256` are accepted too.
pub fn decode_quote_output(data: &[u8]) -> Result<U256, alloy_sol_types::Error> {
    if data.len() == 32 {
        return Ok(U256::from_be_slice(data));
    }
    IQuoterV2::quoteExactInputSingleCall::abi_decode_returns(data).map(|ret| ret.amountOut)
}

/// Wraps calls into an `aggregate3` payload; every call may fail on its own.
pub fn encode_aggregate(calls: impl IntoIterator<Item = (Address, Bytes)>) -> Bytes {
    let calls = calls
        .into_iter()
        .map(|(target, call_data)| IMulticall3::Call3 { target, allowFailure: true, callData: call_data })
        .collect();
    IMulticall3::aggregate3Call { calls }.abi_encode().into()
}

pub fn decode_aggregate(data: &[u8]) -> Result<Vec<Call3Result>, alloy_sol_types::Error> {
    IMulticall3::aggregate3Call::abi_decode_returns(data)
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Helpers for building fake node answers.
    use super::*;
    use alloy_sol_types::SolValue;

    pub fn quote_return(amount_out: U256) -> Bytes {
        // (amountOut, sqrtPriceX96After, initializedTicksCrossed, gasEstimate)
        (amount_out, U256::ZERO, U256::from(1u64), U256::from(80_000u64)).abi_encode_params().into()
    }

    pub fn aggregate_return(results: Vec<(bool, Bytes)>) -> Bytes {
        let results: Vec<Call3Result> = results
            .into_iter()
            .map(|(success, data)| Call3Result { success, returnData: data })
            .collect();
        (results,).abi_encode_params().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    fn request(fee: u32) -> QuoteRequest {
        QuoteRequest::new(WETH, USDC, U256::from(10u64).pow(U256::from(18u64)), fee).unwrap()
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_quote_call(&request(500)).unwrap();
        let b = encode_quote_call(&request(500)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, encode_quote_call(&request(3000)).unwrap());
    }

    #[test]
    fn encodes_v2_selector_and_params() {
        let data = encode_quote_call(&request(500)).unwrap();
        // selector + 5 static words
        assert_eq!(data.len(), 4 + 5 * 32);
        assert_eq!(&data[..4], &IQuoterV2::quoteExactInputSingleCall::SELECTOR);
        assert_eq!(&data[4 + 12..4 + 32], WETH.as_slice());
        assert_eq!(U256::from_be_slice(&data[4 + 96..4 + 128]), U256::from(500u64));
        assert_eq!(U256::from_be_slice(&data[4 + 128..4 + 160]), U256::ZERO);
    }

    #[test]
    fn rejects_oversized_fee() {
        let mut req = request(500);
        req.fee_tier = MAX_FEE_TIER + 1;
        assert_eq!(encode_quote_call(&req), Err(EncodingError::FeeOutOfRange(MAX_FEE_TIER + 1)));
    }

    #[test]
    fn decodes_full_and_bare_returns() {
        let full = test_util::quote_return(U256::from(2_500_000_000u64));
        assert_eq!(decode_quote_output(&full).unwrap(), U256::from(2_500_000_000u64));
        let bare = U256::from(42u64).to_be_bytes::<32>();
        assert_eq!(decode_quote_output(&bare).unwrap(), U256::from(42u64));
        assert!(decode_quote_output(&[1, 2, 3]).is_err());
    }

    #[test]
    fn aggregate_results_round_trip() {
        let payload = test_util::aggregate_return(vec![
            (true, test_util::quote_return(U256::from(7u64))),
            (false, Bytes::new()),
        ]);
        let decoded = decode_aggregate(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].success);
        assert!(!decoded[1].success);
        assert_eq!(decode_quote_output(&decoded[0].returnData).unwrap(), U256::from(7u64));
    }
}
