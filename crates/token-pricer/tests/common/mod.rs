//! Scripted node for engine tests: answers `aggregate3` and direct quoter
//! calls from a table and counts what it was asked.

#![allow(dead_code)]

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use token_pricer::config::NetworkConfig;
use token_pricer::engine::encoder::{IMulticall3, IQuoterV2};
use token_pricer::rpc::EthCall;
use token_pricer::types::{Network, TokenDescriptor, TransportError};
use token_pricer::{EngineSettings, PriceEngine};

pub const LINK: Address = address!("514910771AF9Ca656af840dff83E8264EcF986CA");
pub const UNI: Address = address!("1f9840a85d5aF5bf1D1762F925BDADdC4201F984");
pub const DEAD: Address = address!("000000000000000000000000000000000000dEaD");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Status,
    RateLimited,
}

#[derive(Default)]
pub struct ScriptedNode {
    quotes: Mutex<HashMap<(Address, Address, u32), U256>>,
    /// Every quote seen, as (token_in, token_out, fee).
    pub seen: Mutex<Vec<(Address, Address, u32)>>,
    pub aggregate_calls: AtomicUsize,
    pub direct_calls: AtomicUsize,
    fail_all: Mutex<Option<Failure>>,
    /// Chunks containing a quote for this token fail at the transport level.
    poison: Mutex<Option<Address>>,
    slow: AtomicBool,
}

impl ScriptedNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn quote(&self, token_in: Address, token_out: Address, fee: u32, amount_out: u128) -> &Self {
        self.quotes.lock().unwrap().insert((token_in, token_out, fee), U256::from(amount_out));
        self
    }

    pub fn fail_all(&self, failure: Option<Failure>) {
        *self.fail_all.lock().unwrap() = failure;
    }

    pub fn poison(&self, token: Address) {
        *self.poison.lock().unwrap() = Some(token);
    }

    pub fn slow(&self) {
        self.slow.store(true, Ordering::SeqCst);
    }

    pub fn aggregates(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn directs(&self) -> usize {
        self.direct_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, params: &IQuoterV2::QuoteExactInputSingleParams) -> Option<U256> {
        let fee = params.fee.to::<u32>();
        self.seen.lock().unwrap().push((params.tokenIn, params.tokenOut, fee));
        self.quotes.lock().unwrap().get(&(params.tokenIn, params.tokenOut, fee)).copied()
    }

    fn failure(&self) -> Option<TransportError> {
        match *self.fail_all.lock().unwrap() {
            Some(Failure::Status) => Some(TransportError::Status(503)),
            Some(Failure::RateLimited) => Some(TransportError::RateLimited),
            None => None,
        }
    }
}

pub fn quote_return(amount_out: U256) -> Bytes {
    (amount_out, U256::ZERO, U256::from(1u64), U256::from(80_000u64)).abi_encode_params().into()
}

#[async_trait]
impl EthCall for ScriptedNode {
    async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let net = NetworkConfig::defaults(Network::Ethereum);

        if to == net.multicall {
            self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failure() {
                return Err(err);
            }
            let calls = IMulticall3::aggregate3Call::abi_decode(&data)
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?
                .calls;
            let mut results = Vec::with_capacity(calls.len());
            let poison = *self.poison.lock().unwrap();
            for call in calls {
                let params = IQuoterV2::quoteExactInputSingleCall::abi_decode(&call.callData)
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))?
                    .params;
                if poison == Some(params.tokenIn) {
                    return Err(TransportError::Status(502));
                }
                results.push(match self.answer(&params) {
                    Some(amount) => IMulticall3::Call3Result { success: true, returnData: quote_return(amount) },
                    None => IMulticall3::Call3Result { success: false, returnData: Bytes::new() },
                });
            }
            return Ok((results,).abi_encode_params().into());
        }

        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure() {
            return Err(err);
        }
        let params = IQuoterV2::quoteExactInputSingleCall::abi_decode(&data)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?
            .params;
        match self.answer(&params) {
            Some(amount) => Ok(quote_return(amount)),
            None => Err(TransportError::Rpc { code: 3, message: "execution reverted".into() }),
        }
    }
}

pub fn network() -> NetworkConfig {
    NetworkConfig::defaults(Network::Ethereum)
}

pub fn usdc() -> TokenDescriptor {
    network().stable
}

pub fn weth() -> TokenDescriptor {
    network().base
}

pub fn token(symbol: &str, address: Address) -> TokenDescriptor {
    TokenDescriptor::from_parts(symbol, address, 18)
}

pub fn engine_with(node: &Arc<ScriptedNode>, settings: EngineSettings) -> PriceEngine {
    PriceEngine::new(settings).with_network(network(), node.clone())
}

pub fn engine(node: &Arc<ScriptedNode>) -> PriceEngine {
    engine_with(node, EngineSettings::default())
}
